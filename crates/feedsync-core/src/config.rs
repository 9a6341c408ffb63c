//! Shared configuration for feed synchronization.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::category::MediaCategory;

pub const DEFAULT_STORAGE_URL: &str = "http://localhost:3000";
pub const DEFAULT_ANALYSIS_URL: &str = "http://localhost:8000";
pub const DEFAULT_STORAGE_INTERVAL_MS: u64 = 15_000;
/// Polling cadence of the analysis backend.
pub const DEFAULT_ANALYSIS_INTERVAL_MS: u64 = 3_000;
pub const DEFAULT_WINDOW_SECS: u64 = 24 * 60 * 60;
/// Largest window `TimeDelta` can represent; larger values are clamped.
const MAX_WINDOW_SECS: u64 = i64::MAX as u64 / 1_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Endpoint locations, poll cadence, and the categories to follow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Base URL of the dashboard serving `/api/files`.
    pub storage_url: String,
    /// Base URL of the analysis backend.
    pub analysis_url: String,
    pub storage_interval_ms: u64,
    pub analysis_interval_ms: u64,
    pub window_secs: u64,
    pub categories: Vec<CategoryConfig>,
}

/// Per-category overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryConfig {
    pub category: MediaCategory,
    /// Path on the analysis backend; defaults to `/{category}`.
    #[serde(default)]
    pub analysis_path: Option<String>,
    #[serde(default)]
    pub window_secs: Option<u64>,
}

impl CategoryConfig {
    pub fn new(category: MediaCategory) -> Self {
        Self {
            category,
            analysis_path: None,
            window_secs: None,
        }
    }

    pub fn analysis_path(&self) -> String {
        match &self.analysis_path {
            Some(path) => format!("/{}", path.trim_start_matches('/')),
            None => format!("/{}", self.category),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            storage_url: DEFAULT_STORAGE_URL.to_string(),
            analysis_url: DEFAULT_ANALYSIS_URL.to_string(),
            storage_interval_ms: DEFAULT_STORAGE_INTERVAL_MS,
            analysis_interval_ms: DEFAULT_ANALYSIS_INTERVAL_MS,
            window_secs: DEFAULT_WINDOW_SECS,
            categories: MediaCategory::ALL.into_iter().map(CategoryConfig::new).collect(),
        }
    }
}

impl FeedConfig {
    /// Load a config file. Missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: FeedConfig = serde_json::from_str(&text)?;
        config.validate()?;
        tracing::debug!(
            path = %path.display(),
            categories = config.categories.len(),
            "loaded feed config"
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage_interval_ms == 0 || self.analysis_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll intervals must be non-zero".into()));
        }
        if self.window_secs == 0 || self.categories.iter().any(|c| c.window_secs == Some(0)) {
            return Err(ConfigError::Invalid("recency window must be non-zero".into()));
        }
        let mut seen = HashSet::new();
        for c in &self.categories {
            if !seen.insert(c.category) {
                return Err(ConfigError::Invalid(format!(
                    "category {} configured twice",
                    c.category
                )));
            }
        }
        Ok(())
    }

    pub fn storage_interval(&self) -> Duration {
        Duration::from_millis(self.storage_interval_ms)
    }

    pub fn analysis_interval(&self) -> Duration {
        Duration::from_millis(self.analysis_interval_ms)
    }

    /// Recency window for `category`, honouring its override.
    pub fn window_for(&self, category: MediaCategory) -> TimeDelta {
        let secs = self
            .categories
            .iter()
            .find(|c| c.category == category)
            .and_then(|c| c.window_secs)
            .unwrap_or(self.window_secs);
        TimeDelta::seconds(secs.min(MAX_WINDOW_SECS) as i64)
    }

    pub fn category(&self, category: MediaCategory) -> Option<&CategoryConfig> {
        self.categories.iter().find(|c| c.category == category)
    }
}
