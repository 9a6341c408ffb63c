//! Text rendering of feed views for the terminal.
//!
//! One line per record: modification time, key, state, and the analysis
//! summary when one is attached.

use std::fmt::Write;

use feedsync_core::{FeedSnapshot, MediaCategory, MergedRecord, RecordState};
use feedsync_sync::{FeedStatus, FeedView};
use serde_json::{Value, json};

const MAX_RECORDS: usize = 50;
const SUMMARY_WIDTH: usize = 60;

pub fn render_view(view: &FeedView) -> String {
    let mut out = format!(
        "=== {} feed, rev {} [{}] ===\n",
        view.category,
        view.revision,
        status_label(&view.status)
    );
    out.push_str(&render_records(&view.snapshot));
    out
}

pub fn render_snapshot(category: MediaCategory, snapshot: &FeedSnapshot) -> String {
    let mut out = format!("=== {category} feed ===\n");
    out.push_str(&render_records(snapshot));
    out
}

/// One-line JSON form of a view, for piping into other tools.
pub fn view_json(view: &FeedView) -> Value {
    json!({
        "category": view.category,
        "revision": view.revision,
        "status": status_label(&view.status),
        "published_at": view.published_at.to_rfc3339(),
        "records": view.snapshot.records(),
    })
}

fn status_label(status: &FeedStatus) -> String {
    match status {
        FeedStatus::Idle => "idle".into(),
        FeedStatus::Loading => "loading".into(),
        FeedStatus::Ready => "ready".into(),
        FeedStatus::Error(msg) => format!("error: {msg}"),
    }
}

fn render_records(snapshot: &FeedSnapshot) -> String {
    let mut out = String::new();
    if snapshot.is_empty() {
        out.push_str("  (no recent records)\n");
        return out;
    }
    for record in snapshot.iter().take(MAX_RECORDS) {
        let _ = writeln!(out, "{}", render_record(record));
    }
    if snapshot.len() > MAX_RECORDS {
        let _ = writeln!(out, "  ... and {} more", snapshot.len() - MAX_RECORDS);
    }
    out
}

fn render_record(record: &MergedRecord) -> String {
    let when = record
        .modified_at()
        .map(|ts| ts.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".repeat(19));
    let state = match record.state() {
        RecordState::Matched => "matched",
        RecordState::Processing => "processing",
    };
    let mut line = format!("  {when}  {:<26} {state:<10}", record.key());
    if let Some(summary) = record
        .analysis
        .as_ref()
        .and_then(|a| a.payload.get("summary"))
        .and_then(Value::as_str)
    {
        line.push_str("  ");
        line.push_str(&shorten(summary));
    }
    line.trim_end().to_string()
}

fn shorten(text: &str) -> String {
    let text = text.trim();
    match text.char_indices().nth(SUMMARY_WIDTH - 3) {
        Some((end, _)) if text.chars().count() > SUMMARY_WIDTH => format!("{}...", &text[..end]),
        _ => text.to_string(),
    }
}
