// Deduplicating pagination over an offset endpoint that cannot be trusted:
// repeated offsets return different or overlapping items and short pages do
// not reliably mean end-of-data. Duplication rate is the progress signal;
// randomized offset jumps escape regions the server keeps re-serving.

use std::collections::HashSet;
use std::future::Future;
use std::hash::Hash;
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use crate::error::{ClientError, Result};

/// Give up after this many consecutive fetch errors.
const MAX_CONSECUTIVE_ERRORS: u32 = 10;

/// Receives each batch of newly-seen records as it arrives. Pages are
/// numbered from 1 in delivery order, and a given identity key is delivered
/// at most once per collection run. Implementations persist incrementally
/// and handle their own storage errors.
#[async_trait]
pub trait PageSink<T: Sync>: Send {
    async fn on_page(&mut self, page: u32, items: &[T]);
}

/// Tuning for one collection run.
///
/// The seen-key set grows for the whole run with no eviction; at very large
/// target counts that is a real memory cost the caller accepts.
#[derive(Debug, Clone)]
pub struct CollectOptions {
    /// Unique records to collect before stopping. 0 means rely on pagination
    /// signals instead (an empty page ends the run).
    pub target_count: u64,
    /// Consecutive pages with zero new records before giving up.
    pub max_stale_pages: u32,
    /// Offset advance on a productive page.
    pub page_size: u64,
    /// Upper bound for randomized offset jumps (the target count wins if
    /// it is larger).
    pub jump_ceiling: u64,
    /// Forward nudge applied when a targeted run gets an empty page.
    pub empty_page_step: u64,
    /// Base delay for error backoff, scaled by the consecutive error count.
    pub base_delay: Duration,
    /// Seed for the offset-jump RNG; fixed seeds make runs reproducible.
    pub seed: Option<u64>,
}

impl CollectOptions {
    /// Geometry for the submolt listing (apparent page size 100).
    pub fn submolts(target_count: u64) -> Self {
        Self {
            target_count,
            max_stale_pages: 20,
            page_size: 100,
            jump_ceiling: 20_000,
            empty_page_step: 1_000,
            base_delay: Duration::from_secs(1),
            seed: None,
        }
    }

    /// Geometry for the post listing.
    pub fn posts(target_count: u64) -> Self {
        Self {
            target_count,
            max_stale_pages: 20,
            page_size: 100,
            jump_ceiling: 100_000,
            empty_page_step: 500,
            base_delay: Duration::from_secs(1),
            seed: None,
        }
    }

    pub fn with_max_stale_pages(mut self, max_stale_pages: u32) -> Self {
        self.max_stale_pages = max_stale_pages;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Drive `fetch` over the endpoint until the target count is reached or a
/// budget (stale pages, consecutive errors) runs out. Returns the number of
/// unique records delivered to `sink`.
///
/// Every fetch error counts toward the error budget except the fatal
/// rate-limit state, which propagates immediately and ends the session.
pub async fn collect_paged<T, K, F, Fut, S>(
    mut fetch: F,
    key_of: impl Fn(&T) -> K,
    sink: &mut S,
    opts: &CollectOptions,
) -> Result<u64>
where
    T: Sync,
    K: Hash + Eq,
    F: FnMut(u64) -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
    S: PageSink<T> + ?Sized,
{
    let mut rng = match opts.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let jump_bound = opts.jump_ceiling.max(opts.target_count);

    let mut seen: HashSet<K> = HashSet::new();
    let mut total: u64 = 0;
    let mut offset: u64 = 0;
    let mut page: u32 = 0;
    let mut stale_pages: u32 = 0;
    let mut consecutive_errors: u32 = 0;

    loop {
        let items = match fetch(offset).await {
            Ok(items) => {
                consecutive_errors = 0;
                items
            }
            Err(err @ ClientError::RateLimitExceeded { .. }) => return Err(err),
            Err(err) => {
                consecutive_errors += 1;
                warn!(offset, consecutive_errors, error = %err, "page fetch failed");
                if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                    break;
                }
                offset = rng.random_range(0..=jump_bound);
                tokio::time::sleep(opts.base_delay * consecutive_errors).await;
                continue;
            }
        };

        if items.is_empty() {
            if opts.target_count > 0 && total < opts.target_count {
                // The server serves empty pages for offsets it does hold
                // data for; nudge into a different range and keep going.
                offset = (offset + opts.empty_page_step) % (opts.target_count * 2);
                stale_pages += 1;
                if stale_pages >= opts.max_stale_pages {
                    break;
                }
                continue;
            }
            break;
        }

        let page_len = items.len();
        let mut new_items = Vec::new();
        for item in items {
            if seen.insert(key_of(&item)) {
                new_items.push(item);
            }
        }

        if new_items.is_empty() {
            stale_pages += 1;
        } else {
            page += 1;
            sink.on_page(page, &new_items).await;
            total += new_items.len() as u64;
            stale_pages = 0;
            debug!(page, new = new_items.len(), total, "page delivered");
        }

        if opts.target_count > 0 && total >= opts.target_count {
            break;
        }
        if stale_pages >= opts.max_stale_pages {
            debug!(stale_pages, total, "stale page budget exhausted, giving up");
            break;
        }

        // Mostly duplicates means this region keeps re-serving the same
        // records; jump somewhere else instead of walking forward.
        if (new_items.len() as u64) * 2 < page_len as u64 {
            offset = rng.random_range(0..=jump_bound);
        } else {
            offset += opts.page_size;
        }
    }

    Ok(total)
}
