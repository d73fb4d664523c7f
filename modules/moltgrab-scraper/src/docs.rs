// Documentation snapshots: plain one-shot downloads, deliberately outside
// the throttled API client (the docs live on the public site, not the API).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use chrono::Local;
use tracing::{info, warn};

/// Platform documents worth snapshotting alongside the archive.
const MOLTBOOK_DOCS: &[(&str, &str)] = &[
    ("skill", "https://moltbook.com/skill.md"),
    ("heartbeat", "https://www.moltbook.com/heartbeat.md"),
    ("messaging", "https://www.moltbook.com/messaging.md"),
];

/// Fetch each documentation page and save it under `output_dir` with a
/// timestamped filename. Individual failures are logged and skipped;
/// returns the paths that were saved.
pub async fn fetch_docs(output_dir: &Path) -> Result<Vec<PathBuf>> {
    tokio::fs::create_dir_all(output_dir).await?;

    let stamp = Local::now().format("%Y-%m-%d_%H%M%S").to_string();
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;

    let mut saved = Vec::new();
    for (name, url) in MOLTBOOK_DOCS {
        match fetch_one(&client, url).await {
            Ok(body) => {
                let path = output_dir.join(format!("{name}_{stamp}.md"));
                tokio::fs::write(&path, &body).await?;
                info!(doc = name, bytes = body.len(), "saved documentation snapshot");
                saved.push(path);
            }
            Err(err) => warn!(doc = name, error = %err, "failed to fetch documentation"),
        }
    }
    Ok(saved)
}

async fn fetch_one(client: &reqwest::Client, url: &str) -> Result<String> {
    let response = client.get(url).send().await?.error_for_status()?;
    Ok(response.text().await?)
}
