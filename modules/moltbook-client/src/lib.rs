// Moltbook API client. The platform's API has an undocumented rate limit
// and non-deterministic offset pagination, so every call goes through a
// proactive sliding-window throttle with escalating cooldown, and listings
// are collected with the deduplicating streaming algorithm in `paginate`.

pub mod error;
pub mod paginate;
pub mod types;

mod throttle;

pub use error::{ClientError, Result};
pub use paginate::{collect_paged, CollectOptions, PageSink};
pub use types::{
    Agent, Comment, Moderator, PlatformStats, Post, PostWithComments, Submolt,
};

use std::time::{Duration, Instant};

use reqwest::{Method, Response, StatusCode};
use tokio::sync::Mutex;
use tracing::{info, warn};

use throttle::{RateLimitStep, ThrottleState, DEFAULT_COOLDOWN_BASE, RATE_THRESHOLD};
use types::{ModeratorsEnvelope, PostEnvelope, PostsPage, ProfileEnvelope, SubmoltsPage};

const DEFAULT_BASE_URL: &str = "https://www.moltbook.com/api/v1";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Apparent page size of the submolt listing.
const SUBMOLT_PAGE_SIZE: usize = 100;

/// Facade-level retries for the stats endpoint, which sporadically reports
/// zeros instead of erroring.
const STATS_RETRIES: u32 = 10;

/// Observer invoked with the target URL on every admitted request attempt.
pub type RequestObserver = Box<dyn Fn(&str) + Send + Sync>;

pub struct MoltbookClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    max_retries: u32,
    base_delay: Duration,
    timeout: Duration,
    on_request: Option<RequestObserver>,
    state: Mutex<ThrottleState>,
}

impl MoltbookClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::builder(api_key).build()
    }

    pub fn builder(api_key: impl Into<String>) -> MoltbookClientBuilder {
        MoltbookClientBuilder {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            timeout: DEFAULT_TIMEOUT,
            cooldown_base: DEFAULT_COOLDOWN_BASE,
            on_request: None,
        }
    }

    /// Requests attempted over the life of this client, admitted or retried.
    pub async fn request_count(&self) -> u64 {
        self.state.lock().await.request_count
    }

    // --- Request executor ---

    /// Block until the throttle admits a request: wait out any active
    /// cooldown first, then the sliding window if it is at threshold.
    async fn admit(&self) {
        let cooldown = { self.state.lock().await.cooldown_wait(Instant::now()) };
        if let Some((wait, consecutive)) = cooldown {
            warn!(
                wait_secs = wait.as_secs_f64(),
                consecutive_429s = consecutive,
                "rate-limit cooldown active, waiting"
            );
            tokio::time::sleep(wait).await;
        }

        let window = { self.state.lock().await.window_wait(Instant::now()) };
        if let Some((in_window, wait)) = window {
            warn!(
                requests_in_window = in_window,
                threshold = RATE_THRESHOLD,
                wait_secs = wait.as_secs_f64(),
                "sliding-window throttle, waiting for capacity"
            );
            tokio::time::sleep(wait).await;
        }
    }

    async fn note_429(&self) -> Result<()> {
        let step = { self.state.lock().await.record_429(Instant::now()) };
        match step {
            RateLimitStep::Fatal {
                consecutive,
                request_count,
            } => Err(ClientError::RateLimitExceeded {
                consecutive,
                request_count,
            }),
            RateLimitStep::Cooldown {
                consecutive,
                duration,
            } => {
                info!(
                    cooldown_secs = duration.as_secs(),
                    consecutive_429s = consecutive,
                    "entering extended cooldown; check API key validity and rate limit status"
                );
                Ok(())
            }
            RateLimitStep::Backoff { .. } => Ok(()),
        }
    }

    async fn note_success(&self) {
        self.state.lock().await.record_success(Instant::now());
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }

    /// Execute one logical request with throttling and retries. Timeouts,
    /// 429s and 5xx responses are retried with exponential backoff; an
    /// exhausted 5xx is returned as-is so the caller can inspect the status,
    /// while an exhausted 429 fails with [`ClientError::RateLimited`].
    async fn request(&self, method: Method, path: &str, query: &[(&str, String)]) -> Result<Response> {
        self.request_with_timeout(method, path, query, self.timeout)
            .await
    }

    async fn request_with_timeout(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        timeout: Duration,
    ) -> Result<Response> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt: u32 = 0;
        loop {
            self.admit().await;

            {
                let mut state = self.state.lock().await;
                state.request_count += 1;
            }
            if let Some(observer) = &self.on_request {
                observer(&url);
            }

            let mut request = self
                .http
                .request(method.clone(), &url)
                .bearer_auth(&self.api_key)
                .timeout(timeout);
            if !query.is_empty() {
                request = request.query(query);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(err) if err.is_timeout() => {
                    warn!(%url, attempt, error = %err, "request timed out");
                    if attempt < self.max_retries {
                        tokio::time::sleep(self.backoff_delay(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(ClientError::Network(err.to_string()));
                }
                Err(err) => return Err(err.into()),
            };

            if response.status() == StatusCode::TOO_MANY_REQUESTS {
                self.note_429().await?;
                if attempt < self.max_retries {
                    tokio::time::sleep(self.backoff_delay(attempt)).await;
                    attempt += 1;
                    continue;
                }
                return Err(ClientError::RateLimited {
                    retries: self.max_retries,
                });
            }

            if response.status().is_server_error() && attempt < self.max_retries {
                warn!(%url, attempt, status = response.status().as_u16(), "server error, retrying");
                tokio::time::sleep(self.backoff_delay(attempt)).await;
                attempt += 1;
                continue;
            }

            // Everything else ends the 429 streak and enters the sliding
            // window, including a final-attempt 5xx returned for the caller
            // to inspect.
            self.note_success().await;
            return Ok(response);
        }
    }

    async fn error_for_status(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(ClientError::Api {
            status: status.as_u16(),
            message,
        })
    }

    // --- Listings ---

    /// One page of the submolt listing.
    pub async fn submolts_page(&self, offset: u64) -> Result<Vec<Submolt>> {
        let mut query = Vec::new();
        if offset > 0 {
            query.push(("offset", offset.to_string()));
        }
        let response = self.request(Method::GET, "/submolts", &query).await?;
        let response = Self::error_for_status(response).await?;
        let page: SubmoltsPage = response.json().await?;
        Ok(page.submolts)
    }

    /// One page of the post listing.
    pub async fn posts_page(&self, offset: u64, limit: u64) -> Result<Vec<Post>> {
        let mut query = vec![("limit", limit.to_string())];
        if offset > 0 {
            query.push(("offset", offset.to_string()));
        }
        let response = self.request(Method::GET, "/posts", &query).await?;
        let response = Self::error_for_status(response).await?;
        let page: PostsPage = response.json().await?;
        Ok(page.posts)
    }

    /// Accumulate the whole submolt listing in memory, trusting the
    /// server's pagination signals (empty or short page ends the walk).
    /// `on_progress` is called with `(page, items_so_far)`.
    pub async fn fetch_submolts(
        &self,
        mut on_progress: Option<&mut dyn FnMut(u32, usize)>,
    ) -> Result<Vec<Submolt>> {
        let mut all = Vec::new();
        let mut offset: u64 = 0;
        let mut page: u32 = 0;
        loop {
            let submolts = self.submolts_page(offset).await?;
            if submolts.is_empty() {
                break;
            }
            let fetched = submolts.len();
            all.extend(submolts);
            page += 1;
            if let Some(progress) = &mut on_progress {
                progress(page, all.len());
            }
            if fetched < SUBMOLT_PAGE_SIZE {
                break;
            }
            offset += fetched as u64;
        }
        Ok(all)
    }

    /// Accumulate the whole post listing in memory; see [`fetch_submolts`]
    /// for the pagination-signal caveats.
    ///
    /// [`fetch_submolts`]: MoltbookClient::fetch_submolts
    pub async fn fetch_all_posts(
        &self,
        mut on_progress: Option<&mut dyn FnMut(u32, usize)>,
        limit: u64,
    ) -> Result<Vec<Post>> {
        let mut all = Vec::new();
        let mut offset: u64 = 0;
        let mut page: u32 = 0;
        loop {
            let posts = self.posts_page(offset, limit).await?;
            if posts.is_empty() {
                break;
            }
            let fetched = posts.len();
            all.extend(posts);
            page += 1;
            if let Some(progress) = &mut on_progress {
                progress(page, all.len());
            }
            if (fetched as u64) < limit {
                break;
            }
            offset += limit;
        }
        Ok(all)
    }

    /// Stream unique submolts into `sink` until the collection converges;
    /// see [`collect_paged`] for the convergence rules. Returns the number
    /// of unique submolts delivered.
    pub async fn stream_submolts<S>(&self, sink: &mut S, opts: CollectOptions) -> Result<u64>
    where
        S: PageSink<Submolt> + ?Sized,
    {
        collect_paged(
            move |offset| self.submolts_page(offset),
            |submolt: &Submolt| submolt.name.clone(),
            sink,
            &opts,
        )
        .await
    }

    /// Stream unique posts into `sink`; the post id is the identity key.
    pub async fn stream_posts<S>(&self, sink: &mut S, opts: CollectOptions) -> Result<u64>
    where
        S: PageSink<Post> + ?Sized,
    {
        let page_size = opts.page_size;
        collect_paged(
            move |offset| self.posts_page(offset, page_size),
            |post: &Post| post.id.clone(),
            sink,
            &opts,
        )
        .await
    }

    // --- Single-record operations ---

    /// Fetch an agent's profile by name. The endpoint signals absence with
    /// a payload-level success flag rather than a 404.
    pub async fn fetch_agent_profile(&self, name: &str) -> Result<Option<Agent>> {
        let query = [("name", name.to_string())];
        let response = self.request(Method::GET, "/agents/profile", &query).await?;
        let response = Self::error_for_status(response).await?;
        let envelope: ProfileEnvelope = response.json().await?;
        if !envelope.success {
            return Ok(None);
        }
        Ok(envelope.agent)
    }

    /// Fetch platform-wide totals, retrying until every counter is non-zero
    /// or the retry budget runs out, then returning the best values seen.
    pub async fn fetch_platform_stats(&self) -> Result<PlatformStats> {
        let mut stats = PlatformStats::default();
        for attempt in 0..STATS_RETRIES {
            let response = self.request(Method::GET, "/stats", &[]).await?;
            let response = Self::error_for_status(response).await?;
            stats = response.json().await?;
            if stats.is_complete() {
                return Ok(stats);
            }
            if attempt + 1 < STATS_RETRIES {
                tokio::time::sleep(self.base_delay * (attempt + 1)).await;
            }
        }
        warn!(?stats, "stats endpoint kept reporting zero fields, returning best effort");
        Ok(stats)
    }

    /// Fetch a submolt's moderator list. Moderators are enrichment, never a
    /// fatal dependency: 404 and every non-fatal error yield an empty list.
    pub async fn fetch_submolt_moderators(&self, submolt_name: &str) -> Result<Vec<Moderator>> {
        match self.moderators_inner(submolt_name).await {
            Ok(moderators) => Ok(moderators),
            Err(err @ ClientError::RateLimitExceeded { .. }) => Err(err),
            Err(err) => {
                warn!(submolt = submolt_name, error = %err, "moderator fetch failed, treating as empty");
                Ok(Vec::new())
            }
        }
    }

    async fn moderators_inner(&self, submolt_name: &str) -> Result<Vec<Moderator>> {
        let path = format!("/submolts/{submolt_name}/moderators");
        let response = self.request(Method::GET, &path, &[]).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let response = Self::error_for_status(response).await?;
        let envelope: ModeratorsEnvelope = response.json().await?;
        Ok(envelope.moderators)
    }

    /// Fetch a post with its comments. A 404 or a payload-level failure
    /// flag both mean the post is absent, not an error.
    pub async fn fetch_post_with_comments(&self, post_id: &str) -> Result<Option<PostWithComments>> {
        let path = format!("/posts/{post_id}");
        let response = self.request(Method::GET, &path, &[]).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::error_for_status(response).await?;
        let envelope: PostEnvelope = response.json().await?;
        if !envelope.success {
            return Ok(None);
        }
        let Some(post) = envelope.post else {
            return Ok(None);
        };
        Ok(Some(PostWithComments {
            post,
            comments: envelope.comments,
        }))
    }
}

pub struct MoltbookClientBuilder {
    api_key: String,
    base_url: String,
    max_retries: u32,
    base_delay: Duration,
    timeout: Duration,
    cooldown_base: Duration,
    on_request: Option<RequestObserver>,
}

impl MoltbookClientBuilder {
    /// Override the API base URL (tests point this at a mock server).
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Retry attempts after the first, for timeouts, 429s and 5xx.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Base delay for exponential backoff between retry attempts.
    pub fn base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Per-request timeout. A timed-out attempt is retried like a 5xx.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Cooldown applied at the third consecutive 429, doubling per further
    /// 429 up to a 300s cap. Tests shrink this to keep runs fast.
    pub fn cooldown_base(mut self, cooldown_base: Duration) -> Self {
        self.cooldown_base = cooldown_base;
        self
    }

    /// Observe every admitted request attempt with its target URL.
    pub fn on_request(mut self, observer: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_request = Some(Box::new(observer));
        self
    }

    pub fn build(self) -> MoltbookClient {
        MoltbookClient {
            http: reqwest::Client::new(),
            base_url: self.base_url,
            api_key: self.api_key,
            max_retries: self.max_retries,
            base_delay: self.base_delay,
            timeout: self.timeout,
            on_request: self.on_request,
            state: Mutex::new(ThrottleState::new(self.cooldown_base)),
        }
    }
}
