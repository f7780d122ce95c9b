//! Row deduplication.
//!
//! Rows are keyed by the values of a caller-chosen set of columns (the time
//! index may be named as one of them). The first occurrence of each key in
//! input order survives, and the result is stably re-sorted by the time index.
//! An empty key list compares whole rows: the index plus every column.

use crate::frame::{Column, Frame};
use crate::{DfCacheError, Result, Timestamp};
use std::collections::HashSet;
use tracing::debug;

#[derive(Debug, PartialEq, Eq, Hash)]
enum KeyPart<'a> {
    Time(Timestamp),
    Float(u64),
    Text(&'a str),
}

enum KeySource<'a> {
    Index,
    Column(&'a Column),
}

fn canonical_bits(v: f64) -> u64 {
    if v.is_nan() {
        f64::NAN.to_bits()
    } else if v == 0.0 {
        0.0f64.to_bits()
    } else {
        v.to_bits()
    }
}

fn resolve_keys<'a>(frame: &'a Frame, key_columns: &[&str]) -> Result<Vec<KeySource<'a>>> {
    if key_columns.is_empty() {
        let mut sources = vec![KeySource::Index];
        sources.extend(frame.columns().iter().map(|(_, c)| KeySource::Column(c)));
        return Ok(sources);
    }

    key_columns
        .iter()
        .map(|&name| {
            if frame.has_column(name) {
                frame.column(name).map(KeySource::Column)
            } else if name == frame.index_name() {
                Ok(KeySource::Index)
            } else {
                Err(DfCacheError::MissingColumn {
                    column: name.to_string(),
                })
            }
        })
        .collect()
}

/// Removes rows whose key repeats an earlier row.
pub fn dedup(frame: &Frame, key_columns: &[&str]) -> Result<Frame> {
    let sources = resolve_keys(frame, key_columns)?;

    let mut seen: HashSet<Vec<KeyPart<'_>>> = HashSet::with_capacity(frame.len());
    let mut keep = Vec::with_capacity(frame.len());

    for row in 0..frame.len() {
        let key: Vec<KeyPart<'_>> = sources
            .iter()
            .map(|source| match source {
                KeySource::Index => KeyPart::Time(frame.index()[row]),
                KeySource::Column(Column::Float(values)) => {
                    KeyPart::Float(canonical_bits(values[row]))
                }
                KeySource::Column(Column::Text(values)) => KeyPart::Text(values[row].as_str()),
            })
            .collect();

        if seen.insert(key) {
            keep.push(row);
        }
    }

    let removed = frame.len() - keep.len();
    if removed > 0 {
        debug!(removed, kept = keep.len(), "dedup_removed_rows");
    }

    Ok(frame.take(&keep).sort_by_index())
}
