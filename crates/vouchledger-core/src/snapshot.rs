//! JSON snapshot codec shared by the file backend and the legacy importer.
//!
//! A snapshot is a JSON object keyed by decimal user ids. Values come in two
//! shapes: a bare integer holding the points (oldest format), or an object
//! with `points` (alias `score`) and `total_vouches`. Rendering always emits
//! the object shape.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{ser::PrettyFormatter, Map, Serializer, Value};
use thiserror::Error;

use crate::models::{LedgerEntry, UserId};

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot is not valid UTF-8")]
    InvalidUtf8,
    #[error("snapshot is not a JSON object of user entries: {0}")]
    Malformed(#[source] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntry {
    pub key: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedSnapshot {
    pub entries: Vec<LedgerEntry>,
    pub skipped: Vec<SkippedEntry>,
}

impl ParsedSnapshot {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.skipped.is_empty()
    }
}

#[derive(Deserialize)]
struct StructuredRecord {
    points: Option<i64>,
    score: Option<i64>,
    total_vouches: Option<i64>,
}

#[derive(Serialize)]
struct StoredRecord {
    points: i64,
    total_vouches: i64,
}

/// Parses snapshot bytes. Whole-file problems are errors; individual bad
/// entries are collected in [`ParsedSnapshot::skipped`]. Blank input is an
/// empty snapshot.
pub fn parse_snapshot(bytes: &[u8]) -> Result<ParsedSnapshot, SnapshotError> {
    let text = std::str::from_utf8(bytes).map_err(|_| SnapshotError::InvalidUtf8)?;
    if text.trim().is_empty() {
        return Ok(ParsedSnapshot::default());
    }

    let object: Map<String, Value> =
        serde_json::from_str(text).map_err(SnapshotError::Malformed)?;

    let mut parsed = ParsedSnapshot::default();
    for (key, value) in object {
        let user_id = match parse_user_id(&key) {
            Some(id) => id,
            None => {
                parsed.skipped.push(SkippedEntry { key, reason: "key is not a user id".to_string() });
                continue;
            }
        };

        match entry_from_value(user_id, value) {
            Some(entry) => parsed.entries.push(entry.clamped()),
            None => {
                parsed.skipped.push(SkippedEntry { key, reason: "malformed entry".to_string() });
            }
        }
    }

    Ok(parsed)
}

/// Only the canonical decimal form counts, so `"+42"` or `" 42"` cannot
/// shadow `"42"`.
fn parse_user_id(key: &str) -> Option<UserId> {
    key.parse::<UserId>().ok().filter(|id| id.to_string() == key)
}

fn entry_from_value(user_id: UserId, value: Value) -> Option<LedgerEntry> {
    match value {
        Value::Number(n) => n.as_i64().map(|points| LedgerEntry::new(user_id, points, 0)),
        Value::Object(map) => {
            let record: StructuredRecord = serde_json::from_value(Value::Object(map)).ok()?;
            let points = record.points.or(record.score).unwrap_or(0);
            Some(LedgerEntry::new(user_id, points, record.total_vouches.unwrap_or(0)))
        }
        _ => None,
    }
}

/// Renders entries in the structured shape, four-space indented, keys in
/// ascending string order.
pub fn render_snapshot<'a, I>(entries: I) -> Result<Vec<u8>, serde_json::Error>
where
    I: IntoIterator<Item = &'a LedgerEntry>,
{
    let records: BTreeMap<String, StoredRecord> = entries
        .into_iter()
        .map(|e| {
            (e.user_id.to_string(), StoredRecord { points: e.points, total_vouches: e.total_vouches })
        })
        .collect();

    let mut out = Vec::new();
    let mut serializer = Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(b"    "));
    records.serialize(&mut serializer)?;
    out.push(b'\n');
    Ok(out)
}
