// SQLite persistence for scraped records. Upserts are idempotent by
// identity key, so re-delivery of the same record across scrape runs is
// harmless; `first_seen_at` survives updates while `last_seen_at` tracks
// the most recent sighting.

use std::path::Path;

use chrono::Utc;
use moltbook_client::{Agent, Comment, Moderator, Post, Submolt};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::warn;

use crate::error::Result;

pub struct ArchiveStore {
    pool: SqlitePool,
}

/// Row counts for the `status` view of the archive.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveCounts {
    pub agents: i64,
    pub submolts: i64,
    pub posts: i64,
    pub comments: i64,
    pub moderators: i64,
    pub agent_snapshots: i64,
    pub post_snapshots: i64,
    pub comment_snapshots: i64,
}

/// Rows written by one snapshot pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotCounts {
    pub agents: u64,
    pub posts: u64,
    pub comments: u64,
}

impl ArchiveStore {
    /// Open (creating if necessary) the archive at `path` and run migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        Self::connect(options).await
    }

    /// In-memory archive, used by tests.
    pub async fn open_in_memory() -> Result<Self> {
        Self::connect(SqliteConnectOptions::new().in_memory(true)).await
    }

    async fn connect(options: SqliteConnectOptions) -> Result<Self> {
        // Single connection: writes serialize in SQLite anyway, and the
        // scraper is single-flight by design.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    fn now() -> String {
        Utc::now().to_rfc3339()
    }

    // --- Upserts ---

    /// Upsert a batch of submolts. Row failures are logged and skipped
    /// rather than aborting the batch. Returns the number of rows written.
    pub async fn upsert_submolts(&self, submolts: &[Submolt]) -> Result<u64> {
        let now = Self::now();
        let mut written = 0u64;
        for submolt in submolts {
            let result = sqlx::query(
                r#"
                INSERT INTO submolts
                    (name, display_name, description, subscriber_count, created_at,
                     first_seen_at, last_seen_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                ON CONFLICT(name) DO UPDATE SET
                    display_name = excluded.display_name,
                    description = excluded.description,
                    subscriber_count = excluded.subscriber_count,
                    created_at = COALESCE(excluded.created_at, submolts.created_at),
                    last_seen_at = excluded.last_seen_at
                "#,
            )
            .bind(&submolt.name)
            .bind(&submolt.display_name)
            .bind(&submolt.description)
            .bind(submolt.subscriber_count)
            .bind(&submolt.created_at)
            .bind(&now)
            .execute(&self.pool)
            .await;

            match result {
                Ok(_) => written += 1,
                Err(err) => warn!(submolt = %submolt.name, error = %err, "failed to upsert submolt"),
            }
        }
        Ok(written)
    }

    /// Upsert a batch of posts. Returns the number of rows written.
    pub async fn upsert_posts(&self, posts: &[Post]) -> Result<u64> {
        let now = Self::now();
        let mut written = 0u64;
        for post in posts {
            let result = sqlx::query(
                r#"
                INSERT INTO posts
                    (id, submolt, author, title, content, upvotes, comment_count,
                     url, created_at, first_seen_at, last_seen_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
                ON CONFLICT(id) DO UPDATE SET
                    submolt = COALESCE(excluded.submolt, posts.submolt),
                    author = COALESCE(excluded.author, posts.author),
                    title = excluded.title,
                    content = excluded.content,
                    upvotes = excluded.upvotes,
                    comment_count = excluded.comment_count,
                    url = COALESCE(excluded.url, posts.url),
                    created_at = COALESCE(excluded.created_at, posts.created_at),
                    last_seen_at = excluded.last_seen_at
                "#,
            )
            .bind(&post.id)
            .bind(&post.submolt)
            .bind(&post.author)
            .bind(&post.title)
            .bind(&post.content)
            .bind(post.upvotes)
            .bind(post.comment_count)
            .bind(&post.url)
            .bind(&post.created_at)
            .bind(&now)
            .execute(&self.pool)
            .await;

            match result {
                Ok(_) => written += 1,
                Err(err) => warn!(post = %post.id, error = %err, "failed to upsert post"),
            }
        }
        Ok(written)
    }

    pub async fn upsert_agent(&self, agent: &Agent) -> Result<()> {
        let now = Self::now();
        sqlx::query(
            r#"
            INSERT INTO agents
                (name, display_name, description, karma, follower_count, created_at,
                 first_seen_at, last_updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
            ON CONFLICT(name) DO UPDATE SET
                display_name = excluded.display_name,
                description = excluded.description,
                karma = excluded.karma,
                follower_count = excluded.follower_count,
                created_at = COALESCE(excluded.created_at, agents.created_at),
                last_updated_at = excluded.last_updated_at
            "#,
        )
        .bind(&agent.name)
        .bind(&agent.display_name)
        .bind(&agent.description)
        .bind(agent.karma)
        .bind(agent.follower_count)
        .bind(&agent.created_at)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Upsert the comments of one post. `post_id` fills in for payloads
    /// that omit the parent post reference.
    pub async fn upsert_comments(&self, post_id: &str, comments: &[Comment]) -> Result<u64> {
        let now = Self::now();
        let mut written = 0u64;
        for comment in comments {
            let parent_post = comment.post_id.as_deref().unwrap_or(post_id);
            let result = sqlx::query(
                r#"
                INSERT INTO comments
                    (id, post_id, parent_id, author, content, upvotes, created_at,
                     first_seen_at, last_seen_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
                ON CONFLICT(id) DO UPDATE SET
                    post_id = excluded.post_id,
                    parent_id = excluded.parent_id,
                    author = COALESCE(excluded.author, comments.author),
                    content = excluded.content,
                    upvotes = excluded.upvotes,
                    created_at = COALESCE(excluded.created_at, comments.created_at),
                    last_seen_at = excluded.last_seen_at
                "#,
            )
            .bind(&comment.id)
            .bind(parent_post)
            .bind(&comment.parent_id)
            .bind(&comment.author)
            .bind(&comment.content)
            .bind(comment.upvotes)
            .bind(&comment.created_at)
            .bind(&now)
            .execute(&self.pool)
            .await;

            match result {
                Ok(_) => written += 1,
                Err(err) => warn!(comment = %comment.id, error = %err, "failed to upsert comment"),
            }
        }
        Ok(written)
    }

    /// Replace a submolt's moderator list wholesale; the roster is small
    /// and the endpoint returns it complete.
    pub async fn replace_moderators(&self, submolt: &str, moderators: &[Moderator]) -> Result<()> {
        let now = Self::now();
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM moderators WHERE submolt = ?1")
            .bind(submolt)
            .execute(&mut *tx)
            .await?;
        for moderator in moderators {
            sqlx::query(
                "INSERT INTO moderators (submolt, agent, role, recorded_at) VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(submolt)
            .bind(&moderator.name)
            .bind(&moderator.role)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    // --- Orchestration queries ---

    pub async fn post_ids(&self) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar::<_, String>("SELECT id FROM posts ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    pub async fn post_ids_without_comments(&self) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar::<_, String>(
            "SELECT id FROM posts WHERE id NOT IN (SELECT DISTINCT post_id FROM comments) ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    pub async fn submolt_names(&self) -> Result<Vec<String>> {
        let names = sqlx::query_scalar::<_, String>("SELECT name FROM submolts ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(names)
    }

    /// Authors seen on posts or comments that have no archived profile yet.
    pub async fn author_names_without_profile(&self) -> Result<Vec<String>> {
        let names = sqlx::query_scalar::<_, String>(
            r#"
            SELECT author FROM posts WHERE author IS NOT NULL
            UNION
            SELECT author FROM comments WHERE author IS NOT NULL
            EXCEPT
            SELECT name FROM agents
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(names)
    }

    // --- Snapshots ---

    /// Copy the current mutable counters of every agent, post and comment
    /// into the snapshot tables under one `captured_at` stamp.
    pub async fn snapshot_all(&self) -> Result<SnapshotCounts> {
        let now = Self::now();
        let mut tx = self.pool.begin().await?;

        let agents = sqlx::query(
            "INSERT INTO agent_snapshots (captured_at, name, karma, follower_count)
             SELECT ?1, name, karma, follower_count FROM agents",
        )
        .bind(&now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let posts = sqlx::query(
            "INSERT INTO post_snapshots (captured_at, post_id, upvotes, comment_count)
             SELECT ?1, id, upvotes, comment_count FROM posts",
        )
        .bind(&now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let comments = sqlx::query(
            "INSERT INTO comment_snapshots (captured_at, comment_id, upvotes)
             SELECT ?1, id, upvotes FROM comments",
        )
        .bind(&now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        Ok(SnapshotCounts {
            agents,
            posts,
            comments,
        })
    }

    // --- Status ---

    pub async fn counts(&self) -> Result<ArchiveCounts> {
        Ok(ArchiveCounts {
            agents: self.count("agents").await?,
            submolts: self.count("submolts").await?,
            posts: self.count("posts").await?,
            comments: self.count("comments").await?,
            moderators: self.count("moderators").await?,
            agent_snapshots: self.count("agent_snapshots").await?,
            post_snapshots: self.count("post_snapshots").await?,
            comment_snapshots: self.count("comment_snapshots").await?,
        })
    }

    async fn count(&self, table: &str) -> Result<i64> {
        // Table names come from the fixed list above, never from input.
        let count = sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn latest_post_created_at(&self) -> Result<Option<String>> {
        let latest = sqlx::query_scalar::<_, Option<String>>(
            "SELECT MAX(created_at) FROM posts",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(latest)
    }

    pub async fn latest_agent_update(&self) -> Result<Option<String>> {
        let latest = sqlx::query_scalar::<_, Option<String>>(
            "SELECT MAX(last_updated_at) FROM agents",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(latest)
    }
}
