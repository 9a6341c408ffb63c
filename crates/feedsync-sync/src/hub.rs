//! One engine per configured category, behind a single handle.

use std::collections::BTreeMap;
use std::sync::Arc;

use feedsync_core::{FeedConfig, MediaCategory};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::engine::{EngineSettings, FeedSyncEngine, FeedView, Subscription};
use crate::source::{AnalysisSource, StorageSource};

type Engines = Arc<BTreeMap<MediaCategory, FeedSyncEngine>>;

/// Runs the feeds of every category named in a [`FeedConfig`].
pub struct FeedHub {
    engines: Engines,
}

/// Cloneable handle given to whatever performs uploads, so it can tell the
/// feeds about new files without owning the hub.
#[derive(Clone)]
pub struct UploadNotifier {
    engines: Engines,
}

impl FeedHub {
    pub fn new(
        config: &FeedConfig,
        storage: Arc<dyn StorageSource>,
        analysis: Arc<dyn AnalysisSource>,
    ) -> Self {
        let engines = config
            .categories
            .iter()
            .map(|c| {
                let settings = EngineSettings::from_config(config, c.category);
                let engine =
                    FeedSyncEngine::new(settings, Arc::clone(&storage), Arc::clone(&analysis));
                (c.category, engine)
            })
            .collect();
        Self {
            engines: Arc::new(engines),
        }
    }

    pub fn categories(&self) -> impl Iterator<Item = MediaCategory> + '_ {
        self.engines.keys().copied()
    }

    pub fn engine(&self, category: MediaCategory) -> Option<&FeedSyncEngine> {
        self.engines.get(&category)
    }

    /// Start every engine. Must be called from within a Tokio runtime.
    pub fn start(&self) {
        for engine in self.engines.values() {
            engine.start();
        }
        info!(feeds = self.engines.len(), "feed hub started");
    }

    pub fn stop(&self) {
        for engine in self.engines.values() {
            engine.stop();
        }
        info!("feed hub stopped");
    }

    pub fn watch(&self, category: MediaCategory) -> Option<watch::Receiver<Arc<FeedView>>> {
        self.engine(category).map(FeedSyncEngine::watch)
    }

    pub fn subscribe<F>(&self, category: MediaCategory, callback: F) -> Option<Subscription>
    where
        F: FnMut(&FeedView) + Send + 'static,
    {
        self.engine(category).map(|e| e.subscribe(callback))
    }

    /// See [`UploadNotifier::notify`].
    pub fn notify(&self, category: MediaCategory, key: &str) -> bool {
        notify(&self.engines, category, key)
    }

    /// See [`UploadNotifier::notify_upload`].
    pub fn notify_upload(&self, key: &str) -> Option<MediaCategory> {
        notify_upload(&self.engines, key)
    }

    pub fn notifier(&self) -> UploadNotifier {
        UploadNotifier {
            engines: Arc::clone(&self.engines),
        }
    }
}

impl UploadNotifier {
    /// Tell the `category` feed that `key` was uploaded. Returns false when
    /// that category is not being followed.
    pub fn notify(&self, category: MediaCategory, key: &str) -> bool {
        notify(&self.engines, category, key)
    }

    /// Route an upload to the feed its extension belongs to. An empty key
    /// refreshes every feed.
    pub fn notify_upload(&self, key: &str) -> Option<MediaCategory> {
        notify_upload(&self.engines, key)
    }
}

fn notify(
    engines: &BTreeMap<MediaCategory, FeedSyncEngine>,
    category: MediaCategory,
    key: &str,
) -> bool {
    match engines.get(&category) {
        Some(engine) => {
            engine.notify(key);
            true
        }
        None => {
            debug!(%category, key, "no feed for category");
            false
        }
    }
}

fn notify_upload(
    engines: &BTreeMap<MediaCategory, FeedSyncEngine>,
    key: &str,
) -> Option<MediaCategory> {
    let key = key.trim();
    if key.is_empty() {
        for engine in engines.values() {
            engine.refresh_now();
        }
        return None;
    }
    let Some(category) = MediaCategory::for_key(key) else {
        debug!(key, "upload matches no media category");
        return None;
    };
    notify(engines, category, key).then_some(category)
}
