//! Scripted in-memory sources for engine tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use feedsync_core::{AnalysisRecord, MediaCategory, StorageRecord};
use serde_json::json;
use tokio::sync::{Notify, watch};

use crate::SyncError;
use crate::engine::FeedView;
use crate::source::{AnalysisSource, StorageSource};

type Scripted<T> = Result<T, String>;

/// Storage record written `age` ago.
pub fn stored(key: &str, age: TimeDelta) -> StorageRecord {
    StorageRecord::new(key, Some((Utc::now() - age).to_rfc3339()))
}

/// Analysis record for `name` generated `age` ago.
pub fn analysed(name: &str, age: TimeDelta, summary: &str) -> AnalysisRecord {
    AnalysisRecord::new(
        name,
        Some((Utc::now() - age).to_rfc3339()),
        json!({ "file_name": name, "summary": summary }),
    )
}

/// Replays queued responses in order; the last one repeats once the queue drains.
struct Script<T> {
    queue: VecDeque<Scripted<T>>,
    last: Scripted<T>,
}

impl<T: Clone> Script<T> {
    fn new(initial: Scripted<T>) -> Self {
        Self {
            queue: VecDeque::from([initial.clone()]),
            last: initial,
        }
    }

    fn next(&mut self) -> Scripted<T> {
        if let Some(next) = self.queue.pop_front() {
            self.last = next;
        }
        self.last.clone()
    }
}

pub struct ScriptedStorage {
    lists: Mutex<Script<Vec<StorageRecord>>>,
    files: Mutex<HashMap<String, Scripted<Option<StorageRecord>>>>,
    file_delays: Mutex<HashMap<String, Duration>>,
    gates: Mutex<VecDeque<Arc<Notify>>>,
    delay: Mutex<Duration>,
    pub list_calls: AtomicUsize,
    pub fetch_calls: AtomicUsize,
}

impl ScriptedStorage {
    pub fn new(records: Vec<StorageRecord>) -> Arc<Self> {
        Arc::new(Self {
            lists: Mutex::new(Script::new(Ok(records))),
            files: Mutex::new(HashMap::new()),
            file_delays: Mutex::new(HashMap::new()),
            gates: Mutex::new(VecDeque::new()),
            delay: Mutex::new(Duration::ZERO),
            list_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
        })
    }

    /// A source whose first listing fails with `message`.
    pub fn failing(message: &str) -> Arc<Self> {
        let source = Self::new(Vec::new());
        *source.lists.lock().unwrap() = Script::new(Err(message.to_string()));
        source
    }

    /// Queue the response for a later listing.
    pub fn then_list(&self, response: Scripted<Vec<StorageRecord>>) {
        self.lists.lock().unwrap().queue.push_back(response);
    }

    /// Serve `record` for single-key fetches of `key`.
    pub fn serve_file(&self, key: &str, response: Scripted<Option<StorageRecord>>) {
        self.files.lock().unwrap().insert(key.to_string(), response);
    }

    /// Delay single-key fetches of `key`.
    pub fn delay_file(&self, key: &str, delay: Duration) {
        self.file_delays.lock().unwrap().insert(key.to_string(), delay);
    }

    /// Make the next listing wait until the returned gate is notified. The
    /// response is chosen when the listing starts.
    pub fn gate_next_list(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates.lock().unwrap().push_back(Arc::clone(&gate));
        gate
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn lists(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageSource for ScriptedStorage {
    async fn list_files(&self, _category: MediaCategory) -> Result<Vec<StorageRecord>, SyncError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let response = self.lists.lock().unwrap().next();
        let gate = self.gates.lock().unwrap().pop_front();
        let delay = *self.delay.lock().unwrap();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        response.map_err(SyncError::Other)
    }

    async fn fetch_file(
        &self,
        _category: MediaCategory,
        key: &str,
    ) -> Result<Option<StorageRecord>, SyncError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let response = self.files.lock().unwrap().get(key).cloned().unwrap_or(Ok(None));
        let delay = self.file_delays.lock().unwrap().get(key).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        response.map_err(SyncError::Other)
    }
}

pub struct ScriptedAnalysis {
    lists: Mutex<Script<Vec<AnalysisRecord>>>,
    pub calls: AtomicUsize,
}

impl ScriptedAnalysis {
    pub fn new(records: Vec<AnalysisRecord>) -> Arc<Self> {
        Arc::new(Self {
            lists: Mutex::new(Script::new(Ok(records))),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn then_list(&self, response: Scripted<Vec<AnalysisRecord>>) {
        self.lists.lock().unwrap().queue.push_back(response);
    }
}

#[async_trait]
impl AnalysisSource for ScriptedAnalysis {
    async fn list_results(
        &self,
        _category: MediaCategory,
    ) -> Result<Vec<AnalysisRecord>, SyncError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let response = self.lists.lock().unwrap().next();
        response.map_err(SyncError::Other)
    }
}

/// Wait (bounded) until a view satisfying `pred` is published.
pub async fn wait_for<F>(rx: &mut watch::Receiver<Arc<FeedView>>, pred: F) -> Arc<FeedView>
where
    F: FnMut(&Arc<FeedView>) -> bool,
{
    let view = tokio::time::timeout(Duration::from_secs(30), rx.wait_for(pred))
        .await
        .expect("timed out waiting for feed view")
        .expect("engine dropped");
    Arc::clone(&view)
}
