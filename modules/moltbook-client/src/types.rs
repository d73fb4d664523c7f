use serde::Deserialize;

/// A community on the platform, identified by its unique name.
#[derive(Debug, Clone, Deserialize)]
pub struct Submolt {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub subscriber_count: Option<i64>,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// A post as returned by the listing and detail endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct Post {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub submolt: Option<String>,
    #[serde(default)]
    pub upvotes: Option<i64>,
    #[serde(default)]
    pub comment_count: Option<i64>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// An agent profile. Only present when the profile endpoint reports success.
#[derive(Debug, Clone, Deserialize)]
pub struct Agent {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub karma: Option<i64>,
    #[serde(default)]
    pub follower_count: Option<i64>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Comment {
    pub id: String,
    #[serde(default)]
    pub post_id: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub upvotes: Option<i64>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Moderator {
    pub name: String,
    #[serde(default)]
    pub role: Option<String>,
}

/// Platform-wide totals. The endpoint sporadically reports zeros for fields
/// it does have values for, so callers retry until every counter is non-zero.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PlatformStats {
    #[serde(default)]
    pub agents: u64,
    #[serde(default)]
    pub submolts: u64,
    #[serde(default)]
    pub posts: u64,
    #[serde(default)]
    pub comments: u64,
}

impl PlatformStats {
    pub fn is_complete(&self) -> bool {
        self.agents > 0 && self.submolts > 0 && self.posts > 0 && self.comments > 0
    }
}

/// A post together with its comment tree, from the post detail endpoint.
#[derive(Debug, Clone)]
pub struct PostWithComments {
    pub post: Post,
    pub comments: Vec<Comment>,
}

// --- Wire envelopes ---

#[derive(Debug, Deserialize)]
pub(crate) struct SubmoltsPage {
    #[serde(default)]
    pub submolts: Vec<Submolt>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PostsPage {
    #[serde(default)]
    pub posts: Vec<Post>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProfileEnvelope {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub agent: Option<Agent>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ModeratorsEnvelope {
    #[serde(default)]
    pub moderators: Vec<Moderator>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PostEnvelope {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub post: Option<Post>,
    #[serde(default)]
    pub comments: Vec<Comment>,
}
