//! Sync layer: polls storage and analysis sources, correlates them, and
//! publishes one recency-filtered feed per media category.

mod error;

pub mod engine;
pub mod hub;
pub mod scheduler;
pub mod source;

#[cfg(feature = "http")]
pub mod http;

#[cfg(test)]
mod testing;

pub use engine::{EngineSettings, FeedStatus, FeedSyncEngine, FeedView, Subscription};
pub use error::SyncError;
pub use hub::{FeedHub, UploadNotifier};
pub use scheduler::{PollStats, PollingScheduler, TriggerOutcome};
pub use source::{AnalysisSource, StorageSource};

#[cfg(feature = "http")]
pub use http::{AnalysisClient, StorageClient};
