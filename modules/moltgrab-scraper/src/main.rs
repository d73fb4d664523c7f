use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use moltbook_client::MoltbookClient;
use moltgrab_archive::ArchiveStore;
use moltgrab_scraper::{docs, Config, Scraper};

const DOCS_DIR: &str = "snapshots/docs";

#[derive(Parser)]
#[command(name = "moltgrab", about = "Archive moltbook.com for research", version)]
struct Cli {
    /// Path to the SQLite archive
    #[arg(long, default_value = "moltbook.db")]
    db: PathBuf,

    /// Suppress progress output
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scrape everything: listings, comments, moderators, profiles, snapshots
    Full,
    /// Fetch posts newer than the archive and stop at known territory
    Incremental,
    /// Scrape the submolt listing
    Submolts,
    /// Scrape the post listing
    Posts,
    /// Fetch comments for archived posts
    Comments {
        /// Only fetch for posts with no archived comments yet
        #[arg(long)]
        only_missing: bool,
    },
    /// Fetch moderator rosters for archived submolts
    Moderators,
    /// Fetch agent profiles for archived authors
    Enrich,
    /// Copy current counters into the snapshot tables
    Snapshots,
    /// Save documentation snapshots (no API key required)
    Docs,
    /// Print archive statistics (no API key required)
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let default_level = if cli.quiet { "warn" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    // Commands that need no API key.
    match cli.command {
        Command::Docs => {
            info!("fetching documentation snapshots");
            let saved = docs::fetch_docs(Path::new(DOCS_DIR)).await?;
            info!(saved = saved.len(), "documentation snapshots complete");
            return Ok(());
        }
        Command::Status => {
            let store = ArchiveStore::open(&cli.db).await?;
            print_status(&cli.db, &store).await?;
            return Ok(());
        }
        _ => {}
    }

    let config = Config::from_env()?;
    // 5 retries with a 2s base delay to ride out API instability.
    let client = MoltbookClient::builder(config.api_key)
        .base_url(config.base_url)
        .max_retries(5)
        .base_delay(Duration::from_secs(2))
        .build();
    let store = ArchiveStore::open(&cli.db).await?;
    let scraper = Scraper::new(client, store);

    match cli.command {
        Command::Full => {
            info!("starting full scrape");
            scraper.full_scrape().await?;
            info!("fetching documentation snapshots");
            docs::fetch_docs(Path::new(DOCS_DIR)).await?;
            info!("full scrape complete");
        }
        Command::Incremental => {
            let new_posts = scraper.scrape_posts_incremental().await?;
            info!(new_posts, "incremental scrape complete");
        }
        Command::Submolts => {
            scraper.scrape_submolts().await?;
        }
        Command::Posts => {
            scraper.scrape_posts().await?;
        }
        Command::Comments { only_missing } => {
            let comments = scraper.scrape_comments(only_missing).await?;
            info!(comments, "comment scrape complete");
        }
        Command::Moderators => {
            let moderators = scraper.scrape_moderators().await?;
            info!(moderators, "moderator scrape complete");
        }
        Command::Enrich => {
            let enriched = scraper.enrich_agents().await?;
            info!(enriched, "agent enrichment complete");
        }
        Command::Snapshots => {
            scraper.create_snapshots().await?;
        }
        Command::Docs | Command::Status => {}
    }

    Ok(())
}

async fn print_status(db: &Path, store: &ArchiveStore) -> Result<()> {
    let counts = store.counts().await?;
    println!("Database: {}", db.display());
    println!("  Agents:   {}", counts.agents);
    println!("  Posts:    {}", counts.posts);
    println!("  Submolts: {}", counts.submolts);
    println!("  Comments: {}", counts.comments);
    println!(
        "  Snapshots: {} agent, {} post, {} comment",
        counts.agent_snapshots, counts.post_snapshots, counts.comment_snapshots
    );
    if let Some(latest) = store.latest_post_created_at().await? {
        println!("  Latest post: {latest}");
    }
    if let Some(latest) = store.latest_agent_update().await? {
        println!("  Latest agent update: {latest}");
    }
    Ok(())
}
