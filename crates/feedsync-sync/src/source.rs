//! Data sources the engine polls.

use async_trait::async_trait;
use feedsync_core::{AnalysisRecord, MediaCategory, StorageRecord};

use crate::SyncError;

/// Object storage listing.
#[async_trait]
pub trait StorageSource: Send + Sync {
    /// List every stored asset of `category`.
    async fn list_files(&self, category: MediaCategory) -> Result<Vec<StorageRecord>, SyncError>;

    /// Fetch a single asset by key. `Ok(None)` when it does not exist.
    async fn fetch_file(
        &self,
        category: MediaCategory,
        key: &str,
    ) -> Result<Option<StorageRecord>, SyncError>;
}

/// Analysis backend output.
#[async_trait]
pub trait AnalysisSource: Send + Sync {
    /// Every analysis result currently published for `category`.
    async fn list_results(&self, category: MediaCategory)
    -> Result<Vec<AnalysisRecord>, SyncError>;
}
