// Scrape orchestration: drives the client's operations in sequence and
// persists every page through the archive store as it arrives, so an
// interrupted run keeps everything fetched so far.

use std::collections::HashSet;
use std::slice;

use anyhow::Result;
use async_trait::async_trait;
use moltbook_client::{
    CollectOptions, MoltbookClient, PageSink, PlatformStats, Post, Submolt,
};
use moltgrab_archive::{ArchiveStore, SnapshotCounts};
use tracing::{debug, info, warn};

/// Page size used by the offset walks that are not collector-driven.
const PAGE_LIMIT: u64 = 100;

pub struct Scraper {
    client: MoltbookClient,
    store: ArchiveStore,
}

/// Persists each page of newly-seen submolts as the collector emits it.
struct SubmoltSink<'a> {
    store: &'a ArchiveStore,
}

#[async_trait]
impl PageSink<Submolt> for SubmoltSink<'_> {
    async fn on_page(&mut self, page: u32, items: &[Submolt]) {
        match self.store.upsert_submolts(items).await {
            Ok(written) => info!(page, new = items.len(), written, "archived submolt page"),
            Err(err) => warn!(page, error = %err, "failed to persist submolt page"),
        }
    }
}

struct PostSink<'a> {
    store: &'a ArchiveStore,
}

#[async_trait]
impl PageSink<Post> for PostSink<'_> {
    async fn on_page(&mut self, page: u32, items: &[Post]) {
        match self.store.upsert_posts(items).await {
            Ok(written) => info!(page, new = items.len(), written, "archived post page"),
            Err(err) => warn!(page, error = %err, "failed to persist post page"),
        }
    }
}

impl Scraper {
    pub fn new(client: MoltbookClient, store: ArchiveStore) -> Self {
        Self { client, store }
    }

    /// Everything, in dependency order: listings first, then the per-record
    /// enrichment passes, then a snapshot of the freshly updated counters.
    pub async fn full_scrape(&self) -> Result<()> {
        let stats = self.fetch_stats().await?;
        self.scrape_submolts_with_target(stats.submolts).await?;
        self.scrape_posts_with_target(stats.posts).await?;
        self.scrape_comments(false).await?;
        self.scrape_moderators().await?;
        self.enrich_agents().await?;
        self.create_snapshots().await?;
        Ok(())
    }

    async fn fetch_stats(&self) -> Result<PlatformStats> {
        let stats = self.client.fetch_platform_stats().await?;
        info!(
            agents = stats.agents,
            submolts = stats.submolts,
            posts = stats.posts,
            comments = stats.comments,
            "platform stats"
        );
        Ok(stats)
    }

    /// Collect the submolt listing, targeting the platform's own count of
    /// how many exist. Returns the number of unique submolts archived.
    pub async fn scrape_submolts(&self) -> Result<u64> {
        let stats = self.fetch_stats().await?;
        self.scrape_submolts_with_target(stats.submolts).await
    }

    async fn scrape_submolts_with_target(&self, target: u64) -> Result<u64> {
        let mut sink = SubmoltSink { store: &self.store };
        let total = self
            .client
            .stream_submolts(&mut sink, CollectOptions::submolts(target))
            .await?;
        info!(total, target, "submolt scrape complete");
        Ok(total)
    }

    /// Collect the post listing the same way. Returns unique posts archived.
    pub async fn scrape_posts(&self) -> Result<u64> {
        let stats = self.fetch_stats().await?;
        self.scrape_posts_with_target(stats.posts).await
    }

    async fn scrape_posts_with_target(&self, target: u64) -> Result<u64> {
        let mut sink = PostSink { store: &self.store };
        let total = self
            .client
            .stream_posts(&mut sink, CollectOptions::posts(target))
            .await?;
        info!(total, target, "post scrape complete");
        Ok(total)
    }

    /// Walk the post listing from the front and stop at the first page that
    /// contains nothing new: recent posts sort first, so hitting known ids
    /// means the archive has caught up. Returns the number of new posts.
    pub async fn scrape_posts_incremental(&self) -> Result<u64> {
        let known: HashSet<String> = self.store.post_ids().await?.into_iter().collect();
        let mut new_total = 0u64;
        let mut offset = 0u64;
        loop {
            let posts = self.client.posts_page(offset, PAGE_LIMIT).await?;
            if posts.is_empty() {
                break;
            }
            let fetched = posts.len() as u64;
            let fresh: Vec<Post> = posts
                .into_iter()
                .filter(|post| !known.contains(&post.id))
                .collect();
            if fresh.is_empty() {
                break;
            }
            new_total += self.store.upsert_posts(&fresh).await?;
            info!(offset, new = fresh.len(), "archived new posts");
            if fetched < PAGE_LIMIT {
                break;
            }
            offset += PAGE_LIMIT;
        }
        Ok(new_total)
    }

    /// Fetch comments for archived posts, refreshing the post record along
    /// the way. Returns the number of comments archived.
    pub async fn scrape_comments(&self, only_missing: bool) -> Result<u64> {
        let ids = if only_missing {
            self.store.post_ids_without_comments().await?
        } else {
            self.store.post_ids().await?
        };
        info!(posts = ids.len(), only_missing, "fetching comments");

        let mut total = 0u64;
        for id in &ids {
            match self.client.fetch_post_with_comments(id).await? {
                Some(detail) => {
                    self.store.upsert_posts(slice::from_ref(&detail.post)).await?;
                    total += self
                        .store
                        .upsert_comments(&detail.post.id, &detail.comments)
                        .await?;
                }
                None => debug!(post_id = %id, "post no longer available, skipping"),
            }
        }
        Ok(total)
    }

    /// Fetch moderator rosters for every archived submolt. Missing rosters
    /// come back empty from the client and are simply skipped.
    pub async fn scrape_moderators(&self) -> Result<u64> {
        let names = self.store.submolt_names().await?;
        info!(submolts = names.len(), "fetching moderators");

        let mut total = 0u64;
        for name in &names {
            let moderators = self.client.fetch_submolt_moderators(name).await?;
            if moderators.is_empty() {
                continue;
            }
            self.store.replace_moderators(name, &moderators).await?;
            total += moderators.len() as u64;
        }
        Ok(total)
    }

    /// Fetch profiles for authors that have none archived yet. Returns the
    /// number of profiles archived; authors without a profile are normal.
    pub async fn enrich_agents(&self) -> Result<u64> {
        let names = self.store.author_names_without_profile().await?;
        info!(authors = names.len(), "enriching agent profiles");

        let mut enriched = 0u64;
        for name in &names {
            match self.client.fetch_agent_profile(name).await? {
                Some(agent) => {
                    self.store.upsert_agent(&agent).await?;
                    enriched += 1;
                }
                None => debug!(agent = %name, "no profile for author"),
            }
        }
        Ok(enriched)
    }

    /// Record the current counters of every archived record.
    pub async fn create_snapshots(&self) -> Result<SnapshotCounts> {
        let counts = self.store.snapshot_all().await?;
        info!(
            agents = counts.agents,
            posts = counts.posts,
            comments = counts.comments,
            "snapshots recorded"
        );
        Ok(counts)
    }

    pub fn store(&self) -> &ArchiveStore {
        &self.store
    }
}
