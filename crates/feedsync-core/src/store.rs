//! Keyed, recency-ordered collection of merged records for one feed.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::Serialize;

use crate::model::MergedRecord;

/// Merged records keyed by storage key.
///
/// Insertion order is never observable: [`FeedStore::snapshot`] always sorts
/// by `modified_at` descending, then key ascending.
#[derive(Debug, Clone, Default)]
pub struct FeedStore {
    records: HashMap<String, MergedRecord>,
}

impl FeedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `record`, replacing any record with the same key.
    /// Returns the replaced record.
    pub fn upsert(&mut self, record: MergedRecord) -> Option<MergedRecord> {
        self.records.insert(record.key().to_string(), record)
    }

    /// Replace the whole contents with `records`.
    ///
    /// The new map is built before it is swapped in, so no caller ever
    /// observes a partially filled store. Later duplicates of a key win.
    pub fn replace_all<I>(&mut self, records: I)
    where
        I: IntoIterator<Item = MergedRecord>,
    {
        let next: HashMap<String, MergedRecord> = records
            .into_iter()
            .map(|r| (r.key().to_string(), r))
            .collect();
        self.records = next;
    }

    /// Remove every record for which `keep` returns `false`.
    /// Returns the number of records removed.
    pub fn prune<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&MergedRecord) -> bool,
    {
        let before = self.records.len();
        self.records.retain(|_, r| keep(r));
        before - self.records.len()
    }

    pub fn get(&self, key: &str) -> Option<&MergedRecord> {
        self.records.get(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MergedRecord> {
        self.records.values()
    }

    /// Current contents, newest first.
    pub fn snapshot(&self) -> FeedSnapshot {
        let mut records: Vec<MergedRecord> = self.records.values().cloned().collect();
        records.sort_by(newest_first);
        FeedSnapshot { records }
    }
}

/// Newest `modified_at` first; records without a timestamp last; ties by key.
fn newest_first(a: &MergedRecord, b: &MergedRecord) -> Ordering {
    b.modified_at()
        .cmp(&a.modified_at())
        .then_with(|| a.key().cmp(b.key()))
}

/// An ordered, duplicate-free view of a feed at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeedSnapshot {
    records: Vec<MergedRecord>,
}

impl FeedSnapshot {
    pub fn records(&self) -> &[MergedRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MergedRecord> {
        self.records.iter()
    }

    pub fn get(&self, key: &str) -> Option<&MergedRecord> {
        self.records.iter().find(|r| r.key() == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(MergedRecord::key)
    }
}

impl<'a> IntoIterator for &'a FeedSnapshot {
    type Item = &'a MergedRecord;
    type IntoIter = std::slice::Iter<'a, MergedRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
