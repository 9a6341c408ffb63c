//! Core record types, recency filtering, key correlation, and the feed store.

pub mod category;
pub mod config;
pub mod correlate;
pub mod model;
pub mod recency;
pub mod store;

pub use category::MediaCategory;
pub use config::{CategoryConfig, ConfigError, FeedConfig};
pub use correlate::{AnalysisIndex, correlate, correlate_with, derive_key};
pub use model::{AnalysisRecord, MergedRecord, RecordState, StorageRecord};
pub use recency::{DEFAULT_WINDOW, is_recent, is_recent_at, parse_timestamp};
pub use store::{FeedSnapshot, FeedStore};
