//! HTTP sources: the dashboard's `/api/files` listing and the analysis backend.

use std::collections::HashMap;

use async_trait::async_trait;
use feedsync_core::{AnalysisRecord, FeedConfig, MediaCategory, StorageRecord};
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::SyncError;
use crate::source::{AnalysisSource, StorageSource};

/// Longest body excerpt carried in an error.
const SNIPPET_LEN: usize = 600;

/// Client for the dashboard's storage listing endpoint.
pub struct StorageClient {
    client: reqwest::Client,
    base_url: String,
}

/// Client for the analysis backend.
pub struct AnalysisClient {
    client: reqwest::Client,
    base_url: String,
    paths: HashMap<MediaCategory, String>,
}

#[derive(Deserialize)]
struct FileListing {
    #[serde(default)]
    files: Vec<ListedFile>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListedFile {
    key: Option<String>,
    url: Option<String>,
    size: Option<u64>,
    last_modified: Option<String>,
}

impl StorageClient {
    /// Create a client for the given dashboard base URL.
    ///
    /// `base_url` should be like `http://localhost:3000` (no trailing slash).
    pub fn new(base_url: String) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn files_url(&self) -> String {
        format!("{}/api/files", self.base_url)
    }
}

#[async_trait]
impl StorageSource for StorageClient {
    async fn list_files(&self, category: MediaCategory) -> Result<Vec<StorageRecord>, SyncError> {
        let url = self.files_url();
        debug!(url = %url, %category, "listing stored files");
        let request = self.client.get(&url).query(&[("type", category.as_str())]);
        let body = fetch_json_body(request).await?;
        let records = decode_listing(&body)?;
        info!(%category, count = records.len(), "listed stored files");
        Ok(records)
    }

    async fn fetch_file(
        &self,
        category: MediaCategory,
        key: &str,
    ) -> Result<Option<StorageRecord>, SyncError> {
        let url = self.files_url();
        debug!(url = %url, %category, key, "fetching stored file");
        let request = self
            .client
            .get(&url)
            .query(&[("key", key), ("type", category.as_str())]);
        let body = fetch_json_body(request).await?;
        Ok(decode_listing(&body)?.into_iter().next())
    }
}

impl AnalysisClient {
    /// Create a client for the given analysis base URL, using `/{category}`
    /// as the path for every category.
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            paths: HashMap::new(),
        }
    }

    /// Create a client honouring the per-category paths in `config`.
    pub fn from_config(config: &FeedConfig) -> Self {
        let mut client = Self::new(config.analysis_url.clone());
        for c in &config.categories {
            client.paths.insert(c.category, c.analysis_path());
        }
        client
    }

    fn url_for(&self, category: MediaCategory) -> String {
        match self.paths.get(&category) {
            Some(path) => format!("{}{}", self.base_url, path),
            None => format!("{}/{}", self.base_url, category),
        }
    }
}

#[async_trait]
impl AnalysisSource for AnalysisClient {
    async fn list_results(
        &self,
        category: MediaCategory,
    ) -> Result<Vec<AnalysisRecord>, SyncError> {
        let url = self.url_for(category);
        debug!(url = %url, %category, "polling analysis backend");
        let body = fetch_json_body(self.client.get(&url)).await?;
        let records = decode_analysis(&body)?;
        info!(%category, count = records.len(), "pulled analysis results");
        Ok(records)
    }
}

/// Send `request` and return its body, failing on non-2xx or non-JSON replies.
async fn fetch_json_body(request: reqwest::RequestBuilder) -> Result<String, SyncError> {
    let resp = request.send().await?;
    let status = resp.status();
    let content_type = resp
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let body = resp.text().await?;

    if !status.is_success() {
        return Err(SyncError::Server {
            status: status.as_u16(),
            body: error_message(&body).unwrap_or_else(|| snippet(&body)),
        });
    }
    if !content_type.contains("json") {
        return Err(SyncError::UnexpectedContentType {
            content_type,
            snippet: snippet(&body),
        });
    }
    Ok(body)
}

/// Decode a `{files: [...]}` envelope. Entries without a key are dropped.
pub fn decode_listing(body: &str) -> Result<Vec<StorageRecord>, SyncError> {
    let listing: FileListing = serde_json::from_str(body)?;
    if let Some(error) = listing.error {
        return Err(SyncError::Backend(error));
    }
    Ok(listing
        .files
        .into_iter()
        .filter_map(|f| {
            let key = f.key.filter(|k| !k.is_empty())?;
            Some(StorageRecord {
                key,
                url: f.url,
                size: f.size,
                last_modified: f.last_modified,
            })
        })
        .collect())
}

/// Decode an analysis response.
///
/// Accepts an array of `{filename, content}` items, an array of bare content
/// objects, or a single object of either shape. Items that name no file
/// (such as an aggregated situation report) produce no record.
pub fn decode_analysis(body: &str) -> Result<Vec<AnalysisRecord>, SyncError> {
    let value: Value = serde_json::from_str(body)?;
    match value {
        Value::Array(items) => Ok(items.into_iter().filter_map(record_from_item).collect()),
        Value::Object(_) => Ok(record_from_item(value).into_iter().collect()),
        Value::Null => Ok(Vec::new()),
        other => Err(SyncError::Other(format!(
            "unexpected analysis body: {}",
            snippet(&other.to_string())
        ))),
    }
}

fn record_from_item(item: Value) -> Option<AnalysisRecord> {
    let filename = item
        .get("filename")
        .and_then(Value::as_str)
        .map(str::to_string);
    match item {
        Value::Object(mut map) if map.get("content").is_some_and(Value::is_object) => {
            let content = map.remove("content")?;
            AnalysisRecord::from_content(filename.as_deref(), content)
        }
        other => AnalysisRecord::from_content(filename.as_deref(), other),
    }
}

fn error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    ["error", "detail"]
        .iter()
        .find_map(|field| value.get(*field).and_then(Value::as_str))
        .map(str::to_string)
}

fn snippet(body: &str) -> String {
    match body.char_indices().nth(SNIPPET_LEN) {
        Some((end, _)) => body[..end].to_string(),
        None => body.to_string(),
    }
}
