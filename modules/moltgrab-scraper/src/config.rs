use std::env;

use anyhow::{Context, Result};

const DEFAULT_BASE_URL: &str = "https://www.moltbook.com/api/v1";

/// Scraper configuration loaded from environment variables (after `.env`
/// has been merged in by the entry point).
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub base_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("MOLTBOOK_API_KEY")
            .context("MOLTBOOK_API_KEY not set in environment or .env file")?;
        let base_url =
            env::var("MOLTBOOK_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Ok(Self { api_key, base_url })
    }
}
