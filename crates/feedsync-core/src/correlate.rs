//! Key correlation between storage listings and analysis output.
//!
//! The analysis backend identifies its results by the bare filename it was
//! given, while storage lists full object keys (`uploads/a.jpg`). Both sides
//! are joined on the final path segment of the storage key.
//!
//! # Choosing among re-analyses
//!
//! When several analysis records share a filename, the most recently
//! generated one wins. A record without a parseable generation time sorts
//! before any record with one. If several candidates tie on the newest
//! time, the one already attached to the feed entry is kept, so that a
//! refresh never swaps between equivalent results. Without a previous
//! attachment, the first tied candidate in input order wins.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::model::{AnalysisRecord, MergedRecord, StorageRecord};

/// Extract the final path segment ("base filename") of a storage key.
///
/// `uploads/2026/a.jpg` → `a.jpg`; a key without `/` is returned whole;
/// a key ending in `/` yields an empty string.
pub fn derive_key(storage_path: &str) -> &str {
    storage_path.rsplit('/').next().unwrap_or(storage_path)
}

/// Analysis records indexed by `source_file_name`, keeping only the newest
/// candidates for each name.
#[derive(Debug, Clone, Default)]
pub struct AnalysisIndex {
    by_name: HashMap<String, Candidates>,
}

#[derive(Debug, Clone)]
struct Candidates {
    generated: Option<DateTime<Utc>>,
    /// Records tied on `generated`, in input order.
    records: Vec<AnalysisRecord>,
}

impl AnalysisIndex {
    /// Build the index in a single pass over `records`.
    pub fn build(records: &[AnalysisRecord]) -> Self {
        let mut by_name: HashMap<String, Candidates> = HashMap::with_capacity(records.len());

        for record in records {
            let generated = record.generated_time();
            match by_name.get_mut(&record.source_file_name) {
                None => {
                    by_name.insert(
                        record.source_file_name.clone(),
                        Candidates {
                            generated,
                            records: vec![record.clone()],
                        },
                    );
                }
                // `Option` orders `None` before any `Some`.
                Some(existing) if generated > existing.generated => {
                    existing.generated = generated;
                    existing.records.clear();
                    existing.records.push(record.clone());
                }
                Some(existing) if generated == existing.generated => {
                    existing.records.push(record.clone());
                }
                Some(_) => {}
            }
        }

        Self { by_name }
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Number of distinct filenames with at least one analysis record.
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// The record to attach for `base_name`, preferring `current` on a tie.
    pub fn best_for(
        &self,
        base_name: &str,
        current: Option<&AnalysisRecord>,
    ) -> Option<&AnalysisRecord> {
        let candidates = self.by_name.get(base_name)?;
        if let Some(current) = current {
            if let Some(same) = candidates.records.iter().find(|r| *r == current) {
                return Some(same);
            }
        }
        candidates.records.first()
    }
}

/// Correlate storage records with analysis records.
///
/// Every storage record yields exactly one [`MergedRecord`], matched or not.
/// Runs in O(S + A).
pub fn correlate(storage: &[StorageRecord], analysis: &[AnalysisRecord]) -> Vec<MergedRecord> {
    let index = AnalysisIndex::build(analysis);
    correlate_with(storage.iter().cloned(), &index, |_| None)
}

/// Correlate against a prebuilt index, consulting `attached` for the analysis
/// currently shown for a storage key (used to keep tied results stable).
pub fn correlate_with<'a, I, F>(storage: I, index: &AnalysisIndex, attached: F) -> Vec<MergedRecord>
where
    I: IntoIterator<Item = StorageRecord>,
    F: Fn(&str) -> Option<&'a AnalysisRecord>,
{
    storage
        .into_iter()
        .map(|record| {
            let analysis = index
                .best_for(record.base_name(), attached(&record.key))
                .cloned();
            MergedRecord::new(record, analysis)
        })
        .collect()
}
