//! Per-category feed synchronization.
//!
//! A [`FeedSyncEngine`] polls one storage listing and one analysis listing for
//! a single [`MediaCategory`], correlates the two, and publishes a
//! recency-filtered [`FeedView`] over a `tokio::sync::watch` channel.
//!
//! # Ordering
//!
//! Every request is stamped with a ticket from a per-engine counter when it is
//! issued. Full storage listings and analysis listings each remember the
//! newest ticket they have applied, and single-key fetches remember theirs per
//! key. A listing or fetch older than the applied one is stale and is dropped.
//!
//! Single-key fetches are ordered against full listings and against fetches
//! of the same key, never against each other. A listing that completes after
//! a newer single-key fetch is still applied, but the fetched records stay as
//! fetched. All state lives behind one mutex and is published while it is
//! held, so subscribers observe strictly increasing revisions.
//!
//! # Status
//!
//! | status    | meaning                                                     |
//! |-----------|-------------------------------------------------------------|
//! | `Idle`    | constructed, not started                                    |
//! | `Loading` | started, no storage listing has succeeded yet               |
//! | `Ready`   | storage listed and neither source's last fetch failed       |
//! | `Error`   | the last storage or analysis fetch failed; data is retained |

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use feedsync_core::{
    AnalysisIndex, AnalysisRecord, FeedConfig, FeedSnapshot, FeedStore, MediaCategory,
    MergedRecord, StorageRecord, correlate_with, is_recent_at,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::scheduler::{PollingScheduler, TriggerOutcome};
use crate::source::{AnalysisSource, StorageSource};

/// Timing and filtering for one engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub category: MediaCategory,
    pub window: TimeDelta,
    pub storage_interval: Duration,
    pub analysis_interval: Duration,
}

impl EngineSettings {
    pub fn from_config(config: &FeedConfig, category: MediaCategory) -> Self {
        Self {
            category,
            window: config.window_for(category),
            storage_interval: config.storage_interval(),
            analysis_interval: config.analysis_interval(),
        }
    }
}

/// Feed-level status shown alongside the snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedStatus {
    Idle,
    Loading,
    Ready,
    Error(String),
}

impl FeedStatus {
    pub fn is_error(&self) -> bool {
        matches!(self, FeedStatus::Error(_))
    }
}

/// One published state of a feed.
#[derive(Debug, Clone)]
pub struct FeedView {
    pub category: MediaCategory,
    /// Strictly increasing across publications of one engine.
    pub revision: u64,
    pub status: FeedStatus,
    pub snapshot: Arc<FeedSnapshot>,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
    Stopped,
}

struct EngineState {
    phase: Phase,
    store: FeedStore,
    index: AnalysisIndex,
    next_ticket: u64,
    listing_applied: u64,
    analysis_applied: u64,
    /// Tickets of single-key fetches newer than `listing_applied`.
    fetched: HashMap<String, u64>,
    storage_loaded: bool,
    storage_error: Option<String>,
    analysis_error: Option<String>,
    revision: u64,
}

impl EngineState {
    fn status(&self) -> FeedStatus {
        match self.phase {
            Phase::Idle => FeedStatus::Idle,
            Phase::Running | Phase::Stopped => {
                if let Some(err) = self.storage_error.as_ref().or(self.analysis_error.as_ref()) {
                    FeedStatus::Error(err.clone())
                } else if self.storage_loaded {
                    FeedStatus::Ready
                } else {
                    FeedStatus::Loading
                }
            }
        }
    }

    /// Analysis currently attached to `key`, used to keep tied re-analyses stable.
    fn attached(&self, key: &str) -> Option<&AnalysisRecord> {
        self.store.get(key).and_then(|m| m.analysis.as_ref())
    }
}

struct Pollers {
    storage: PollingScheduler,
    analysis: PollingScheduler,
}

struct EngineInner {
    settings: EngineSettings,
    storage: Arc<dyn StorageSource>,
    analysis: Arc<dyn AnalysisSource>,
    state: Mutex<EngineState>,
    views: watch::Sender<Arc<FeedView>>,
    pollers: Mutex<Option<Pollers>>,
}

/// Synchronizes one media category. Cloning yields another handle to the
/// same engine.
#[derive(Clone)]
pub struct FeedSyncEngine {
    inner: Arc<EngineInner>,
}

/// A callback registered with [`FeedSyncEngine::subscribe`]. Dropping it
/// unsubscribes.
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl FeedSyncEngine {
    /// Create an idle engine. Nothing is fetched until [`start`](Self::start).
    pub fn new(
        settings: EngineSettings,
        storage: Arc<dyn StorageSource>,
        analysis: Arc<dyn AnalysisSource>,
    ) -> Self {
        let initial = Arc::new(FeedView {
            category: settings.category,
            revision: 0,
            status: FeedStatus::Idle,
            snapshot: Arc::new(FeedSnapshot::default()),
            published_at: Utc::now(),
        });
        let (views, _) = watch::channel(initial);
        Self {
            inner: Arc::new(EngineInner {
                settings,
                storage,
                analysis,
                state: Mutex::new(EngineState {
                    phase: Phase::Idle,
                    store: FeedStore::new(),
                    index: AnalysisIndex::default(),
                    next_ticket: 0,
                    listing_applied: 0,
                    analysis_applied: 0,
                    fetched: HashMap::new(),
                    storage_loaded: false,
                    storage_error: None,
                    analysis_error: None,
                    revision: 0,
                }),
                views,
                pollers: Mutex::new(None),
            }),
        }
    }

    pub fn category(&self) -> MediaCategory {
        self.inner.settings.category
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.inner.settings
    }

    /// Start both pollers. Has no effect unless the engine is idle.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        let inner = &self.inner;
        let mut pollers = lock(&inner.pollers);
        {
            let mut state = lock(&inner.state);
            if state.phase != Phase::Idle {
                return;
            }
            state.phase = Phase::Running;
            inner.publish(&mut state);
        }

        let category = inner.settings.category;
        let weak = Arc::downgrade(inner);
        let storage = PollingScheduler::start(
            format!("{category}/storage"),
            inner.settings.storage_interval,
            move || {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.refresh_storage().await;
                    }
                }
            },
        );

        let weak = Arc::downgrade(inner);
        let analysis = PollingScheduler::start(
            format!("{category}/analysis"),
            inner.settings.analysis_interval,
            move || {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.refresh_analysis().await;
                    }
                }
            },
        );

        *pollers = Some(Pollers { storage, analysis });
        info!(
            %category,
            window_secs = inner.settings.window.num_seconds(),
            "feed engine started"
        );
    }

    /// Stop polling. No view is published after this returns.
    pub fn stop(&self) {
        let pollers = {
            let mut pollers = lock(&self.inner.pollers);
            let mut state = lock(&self.inner.state);
            if state.phase == Phase::Stopped {
                return;
            }
            state.phase = Phase::Stopped;
            pollers.take()
        };
        if let Some(pollers) = pollers {
            pollers.storage.stop();
            pollers.analysis.stop();
        }
        info!(category = %self.category(), "feed engine stopped");
    }

    /// Refresh both sources now. Requests made while a fetch is in flight are
    /// satisfied by that fetch.
    pub fn refresh_now(&self) {
        self.inner.trigger_refresh();
    }

    /// Handle an upload of `key`.
    ///
    /// A key of this category is fetched on its own and merged into the feed
    /// instead of re-listing storage. An empty key requests a full refresh.
    /// Keys of other categories are ignored.
    pub fn notify(&self, key: &str) {
        let key = key.trim();
        if key.is_empty() {
            self.refresh_now();
            return;
        }
        let category = self.category();
        if !category.matches(key) {
            debug!(%category, key, "ignoring upload outside category");
            return;
        }
        let Some(ticket) = self.inner.issue_ticket() else {
            return;
        };
        let inner = Arc::clone(&self.inner);
        let key = key.to_string();
        tokio::spawn(async move {
            inner.fetch_one(ticket, key).await;
        });
    }

    /// The most recently published view.
    pub fn view(&self) -> Arc<FeedView> {
        self.inner.views.borrow().clone()
    }

    /// A receiver that always holds the most recent view.
    pub fn watch(&self) -> watch::Receiver<Arc<FeedView>> {
        self.inner.views.subscribe()
    }

    /// Call `callback` with the current view and then with every new one.
    ///
    /// Views arrive in revision order; intermediate views may be skipped when
    /// several are published faster than the callback runs.
    pub fn subscribe<F>(&self, mut callback: F) -> Subscription
    where
        F: FnMut(&FeedView) + Send + 'static,
    {
        let mut rx = self.watch();
        let task = tokio::spawn(async move {
            loop {
                let view = Arc::clone(&rx.borrow_and_update());
                callback(&view);
                if rx.changed().await.is_err() {
                    break;
                }
            }
        });
        Subscription { task }
    }
}

impl EngineInner {
    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        lock(&self.state)
    }

    fn issue_ticket(&self) -> Option<u64> {
        let mut state = self.lock_state();
        if state.phase != Phase::Running {
            return None;
        }
        state.next_ticket += 1;
        Some(state.next_ticket)
    }

    fn trigger_refresh(&self) {
        if let Some(pollers) = lock(&self.pollers).as_ref() {
            let storage = pollers.storage.trigger_now();
            let analysis = pollers.analysis.trigger_now();
            debug!(
                category = %self.settings.category,
                ?storage,
                ?analysis,
                "manual refresh"
            );
        }
    }

    fn trigger_storage_refresh(&self) -> Option<TriggerOutcome> {
        lock(&self.pollers)
            .as_ref()
            .map(|p| p.storage.trigger_now())
    }

    fn is_wanted(&self, record: &StorageRecord, now: DateTime<Utc>) -> bool {
        self.settings.category.matches(&record.key)
            && record
                .modified_at()
                .is_some_and(|ts| is_recent_at(ts, now, self.settings.window))
    }

    async fn refresh_storage(&self) {
        let Some(ticket) = self.issue_ticket() else {
            return;
        };
        let category = self.settings.category;
        let result = self.storage.list_files(category).await;

        let mut guard = self.lock_state();
        let state = &mut *guard;
        if state.phase != Phase::Running {
            return;
        }
        if ticket <= state.listing_applied {
            debug!(
                %category,
                ticket,
                applied = state.listing_applied,
                "discarding stale storage listing"
            );
            return;
        }

        match result {
            Ok(records) => {
                let now = Utc::now();
                let listed = records.len();
                let wanted = records.into_iter().filter(|r| self.is_wanted(r, now));
                let mut merged = correlate_with(wanted, &state.index, |key| state.attached(key));

                // Uploads fetched after this listing was requested win over it.
                let newer: Vec<MergedRecord> = state
                    .fetched
                    .iter()
                    .filter(|&(_, &fetched)| fetched > ticket)
                    .filter_map(|(key, _)| state.store.get(key).cloned())
                    .collect();
                if !newer.is_empty() {
                    debug!(%category, kept = newer.len(), "keeping uploads newer than listing");
                }
                merged.extend(newer);
                state.fetched.retain(|_, fetched| *fetched > ticket);
                state.listing_applied = ticket;

                info!(%category, listed, kept = merged.len(), "storage listing applied");
                state.store.replace_all(merged);
                state.storage_loaded = true;
                state.storage_error = None;
            }
            Err(err) => {
                warn!(%category, error = %err, "storage listing failed");
                state.storage_error = Some(err.to_string());
            }
        }
        self.publish(state);
    }

    async fn refresh_analysis(&self) {
        let Some(ticket) = self.issue_ticket() else {
            return;
        };
        let category = self.settings.category;
        let result = self.analysis.list_results(category).await;

        let mut guard = self.lock_state();
        let state = &mut *guard;
        if state.phase != Phase::Running {
            return;
        }
        if ticket <= state.analysis_applied {
            debug!(
                %category,
                ticket,
                applied = state.analysis_applied,
                "discarding stale analysis listing"
            );
            return;
        }
        state.analysis_applied = ticket;

        match result {
            Ok(records) => {
                state.index = AnalysisIndex::build(&records);
                let current: Vec<StorageRecord> =
                    state.store.iter().map(|m| m.storage.clone()).collect();
                let merged = correlate_with(current, &state.index, |key| state.attached(key));
                debug!(
                    %category,
                    results = records.len(),
                    names = state.index.len(),
                    "analysis applied"
                );
                state.store.replace_all(merged);
                state.analysis_error = None;
            }
            Err(err) => {
                warn!(%category, error = %err, "analysis poll failed");
                state.analysis_error = Some(err.to_string());
            }
        }
        self.publish(state);
    }

    async fn fetch_one(&self, ticket: u64, key: String) {
        let category = self.settings.category;
        let result = self.storage.fetch_file(category, &key).await;

        let mut guard = self.lock_state();
        let state = &mut *guard;
        if state.phase != Phase::Running {
            return;
        }

        let record = match result {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!(%category, key = %key, "uploaded file not found in storage");
                return;
            }
            Err(err) => {
                drop(guard);
                warn!(
                    %category,
                    key = %key,
                    error = %err,
                    "single-file fetch failed, refreshing listing"
                );
                self.trigger_storage_refresh();
                return;
            }
        };

        let newer_fetch = state.fetched.get(&record.key).is_some_and(|&t| t >= ticket);
        if ticket <= state.listing_applied || newer_fetch {
            debug!(%category, key = %key, ticket, "discarding stale single-file fetch");
            return;
        }
        if !self.is_wanted(&record, Utc::now()) {
            debug!(%category, key = %record.key, "uploaded file outside category or window");
            return;
        }
        state.fetched.insert(record.key.clone(), ticket);

        let analysis = state
            .index
            .best_for(record.base_name(), state.attached(&record.key))
            .cloned();
        info!(
            %category,
            key = %record.key,
            matched = analysis.is_some(),
            "uploaded file merged"
        );
        state.store.upsert(MergedRecord::new(record, analysis));
        self.publish(state);
    }

    /// Prune aged-out records and publish a new view if anything changed.
    /// Callers hold the state lock.
    fn publish(&self, state: &mut EngineState) {
        let now = Utc::now();
        let window = self.settings.window;
        let pruned = state.store.prune(|r| {
            r.modified_at()
                .is_some_and(|ts| is_recent_at(ts, now, window))
        });
        if pruned > 0 {
            debug!(category = %self.settings.category, pruned, "records left the recency window");
        }

        let snapshot = state.store.snapshot();
        let status = state.status();
        let category = self.settings.category;
        let revision = &mut state.revision;
        self.views.send_if_modified(|current| {
            if current.status == status && *current.snapshot == snapshot {
                return false;
            }
            *revision += 1;
            *current = Arc::new(FeedView {
                category,
                revision: *revision,
                status,
                snapshot: Arc::new(snapshot),
                published_at: now,
            });
            true
        });
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
