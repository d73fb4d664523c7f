use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    /// A 429 response survived every retry attempt.
    #[error("Rate limited after {retries} retries (429)")]
    RateLimited { retries: u32 },

    /// Too many consecutive 429s for the session to continue. Never retried;
    /// callers are expected to stop and have a human check the API key and
    /// rate limit status.
    #[error(
        "Received {consecutive} consecutive 429 responses ({request_count} total requests in session). \
         Check API key validity and rate limit status."
    )]
    RateLimitExceeded { consecutive: u32, request_count: u64 },
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Parse(err.to_string())
    }
}
