//! Partition file naming and interval predicates.
//!
//! A partition file is named after the first and last timestamps it holds:
//! `{start}_{end}.chunk`, each timestamp in RFC 3339 form with its UTC offset.
//! File-sync tools that cannot store `:` may rewrite every colon as `_`; for
//! whole-second timestamps that yields a 51-character stem with the separator
//! at byte 25, which is accepted on read.

use crate::Timestamp;
use chrono::{DateTime, SecondsFormat};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Extension of partition files.
pub const PARTITION_EXTENSION: &str = "chunk";

/// Length of a stem whose colons were rewritten to underscores.
pub const MANGLED_NAME_LEN: usize = 51;

/// Byte offset of the start/end separator in a mangled stem.
pub const MANGLED_SEPARATOR_POS: usize = 25;

/// Formats a timestamp the way partition names carry it.
pub fn format_timestamp(t: &Timestamp) -> String {
    t.to_rfc3339_opts(SecondsFormat::AutoSi, false)
}

/// Returns the file stem for a partition covering `[start, end]`.
pub fn partition_stem(start: &Timestamp, end: &Timestamp) -> String {
    format!("{}_{}", format_timestamp(start), format_timestamp(end))
}

/// Returns the file name (with extension) for a partition covering `[start, end]`.
pub fn partition_file_name(start: &Timestamp, end: &Timestamp) -> String {
    format!("{}.{}", partition_stem(start, end), PARTITION_EXTENSION)
}

/// Rewrites every `:` as `_`, as file-sync tools do.
pub fn mangle_name(name: &str) -> String {
    name.replace(':', "_")
}

/// Parses a partition file name (extension optional) into `(start, end)`.
///
/// Returns `None` for anything that is not a simple `start_end` stem or a
/// 51-character mangled stem; the caller should skip such files.
pub fn parse_partition_name(name: &str) -> Option<(Timestamp, Timestamp)> {
    let stem = name
        .strip_suffix(PARTITION_EXTENSION)
        .and_then(|s| s.strip_suffix('.'))
        .unwrap_or(name);

    let parsed = if stem.matches('_').count() == 1 {
        stem.split_once('_')
            .and_then(|(start, end)| parse_pair(start, end))
    } else if stem.len() == MANGLED_NAME_LEN
        && stem.as_bytes()[MANGLED_SEPARATOR_POS] == b'_'
        && stem.is_ascii()
    {
        let (start, end) = stem.split_at(MANGLED_SEPARATOR_POS);
        parse_pair(&start.replace('_', ":"), &end[1..].replace('_', ":"))
    } else {
        None
    };

    if parsed.is_none() {
        warn!("Skipping unparseable partition name {:?}", name);
    }
    parsed
}

fn parse_pair(start: &str, end: &str) -> Option<(Timestamp, Timestamp)> {
    let start = DateTime::parse_from_rfc3339(start).ok()?;
    let end = DateTime::parse_from_rfc3339(end).ok()?;
    Some((start, end))
}

/// A partition file on disk together with the interval its name encodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionFile {
    pub path: PathBuf,
    pub start: Timestamp,
    pub end: Timestamp,
    /// Size in bytes.
    pub size: u64,
}

impl PartitionFile {
    /// Builds a descriptor from a path, returning `None` if the name does not parse.
    pub fn from_path(path: impl AsRef<Path>, size: u64) -> Option<Self> {
        let path = path.as_ref();
        let name = path.file_name()?.to_str()?;
        let (start, end) = parse_partition_name(name)?;
        Some(Self {
            path: path.to_path_buf(),
            start,
            end,
            size,
        })
    }

    /// True if the file has any overlap with the query range.
    pub fn overlaps(&self, start: &Timestamp, end: &Timestamp) -> bool {
        self.start <= *end && self.end > *start
    }

    /// True if any instant of `[self.start, self.end]` lies in `[start, end]`.
    pub fn intersects(&self, start: &Timestamp, end: &Timestamp) -> bool {
        self.start <= *end && self.end >= *start
    }

    /// True if the file lies entirely inside `[start, end]`.
    pub fn contained_in(&self, start: &Timestamp, end: &Timestamp) -> bool {
        self.start >= *start && self.end <= *end
    }
}
