pub mod error;
mod store;

pub use error::{ArchiveError, Result};
pub use store::{ArchiveCounts, ArchiveStore, SnapshotCounts};
