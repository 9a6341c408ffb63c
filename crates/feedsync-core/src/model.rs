//! Record types shared between the storage listing, the analysis backend, and the feed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::correlate::derive_key;
use crate::recency::parse_timestamp;

/// An asset descriptor as listed by object storage.
///
/// Storage is authoritative for existence: a feed entry only exists while a
/// `StorageRecord` with its key does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageRecord {
    /// Opaque object key, e.g. `uploads/a.jpg`.
    pub key: String,
    /// Signed download URL. May be absent or already expired.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    /// ISO 8601 timestamp string of the storage write.
    #[serde(default)]
    pub last_modified: Option<String>,
}

impl StorageRecord {
    pub fn new(key: impl Into<String>, last_modified: Option<String>) -> Self {
        Self {
            key: key.into(),
            url: None,
            size: None,
            last_modified,
        }
    }

    /// Parsed `last_modified`, or `None` when absent or unparseable.
    pub fn modified_at(&self) -> Option<DateTime<Utc>> {
        self.last_modified.as_deref().and_then(parse_timestamp)
    }

    /// Final path segment of the key, used to correlate with analysis output.
    pub fn base_name(&self) -> &str {
        derive_key(&self.key)
    }
}

/// One result produced by the analysis backend for one uploaded file.
///
/// The payload is carried as-is; nothing in this crate interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    /// Base filename the backend analysed.
    pub source_file_name: String,
    /// ISO 8601 timestamp string of when the analysis ran.
    #[serde(default)]
    pub generated_at: Option<String>,
    pub payload: Value,
}

impl AnalysisRecord {
    pub fn new(
        source_file_name: impl Into<String>,
        generated_at: Option<String>,
        payload: Value,
    ) -> Self {
        Self {
            source_file_name: source_file_name.into(),
            generated_at,
            payload,
        }
    }

    /// Build a record from a backend `content` object.
    ///
    /// The correlation key is `content.file_name`, falling back to the base
    /// name of the envelope's `filename`. The generation time is
    /// `content.timestamp`, falling back to `content.generated_at`.
    /// Returns `None` when neither name is available.
    pub fn from_content(filename: Option<&str>, content: Value) -> Option<Self> {
        let source_file_name = content
            .get("file_name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| filename.map(|f| derive_key(f).to_string()))
            .filter(|name| !name.is_empty())?;

        let generated_at = ["timestamp", "generated_at"]
            .iter()
            .find_map(|field| content.get(*field).and_then(Value::as_str))
            .map(str::to_string);

        Some(Self {
            source_file_name,
            generated_at,
            payload: content,
        })
    }

    /// Parsed `generated_at`, or `None` when absent or unparseable.
    pub fn generated_time(&self) -> Option<DateTime<Utc>> {
        self.generated_at.as_deref().and_then(parse_timestamp)
    }
}

/// Whether a feed entry has analysis attached yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordState {
    Matched,
    /// Stored but no analysis result has been correlated yet.
    Processing,
}

/// A storage record together with at most one analysis record.
///
/// Identity is the storage key. The attached analysis may appear or be
/// replaced by a newer run across refreshes; the storage side never changes
/// identity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedRecord {
    pub storage: StorageRecord,
    pub analysis: Option<AnalysisRecord>,
    #[serde(skip)]
    modified_at: Option<DateTime<Utc>>,
}

impl MergedRecord {
    pub fn new(storage: StorageRecord, analysis: Option<AnalysisRecord>) -> Self {
        let modified_at = storage.modified_at();
        Self {
            storage,
            analysis,
            modified_at,
        }
    }

    pub fn key(&self) -> &str {
        &self.storage.key
    }

    pub fn base_name(&self) -> &str {
        self.storage.base_name()
    }

    pub fn modified_at(&self) -> Option<DateTime<Utc>> {
        self.modified_at
    }

    pub fn state(&self) -> RecordState {
        match self.analysis {
            Some(_) => RecordState::Matched,
            None => RecordState::Processing,
        }
    }
}
