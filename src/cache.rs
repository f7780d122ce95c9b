//! The cache engine: reads, writes and incremental fetches over a partition directory.

use crate::dedup::dedup;
use crate::directory::PartitionDirectory;
use crate::frame::Frame;
use crate::interval::PartitionFile;
use crate::{DfCacheError, Result, Timestamp};
use chrono::{DurationRound, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Lookback used by `fetch_latest` when the cache is empty.
pub const DEFAULT_EMPTY_LOOKBACK: Duration = Duration::from_secs(24 * 3600);

/// Builder for creating a [`DfCache`].
pub struct DfCacheBuilder {
    path: Option<PathBuf>,
    empty_lookback: Duration,
    debug_dump: bool,
}

impl Default for DfCacheBuilder {
    fn default() -> Self {
        Self {
            path: None,
            empty_lookback: DEFAULT_EMPTY_LOOKBACK,
            debug_dump: false,
        }
    }
}

impl DfCacheBuilder {
    /// Creates a new DfCacheBuilder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the directory holding the partition files.
    pub fn with_path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Sets how far back `fetch_latest` reaches when the cache is empty.
    pub fn with_empty_lookback(mut self, lookback: Duration) -> Self {
        self.empty_lookback = lookback;
        self
    }

    /// Logs the shape of every frame read from or written to the cache at debug level.
    pub fn with_debug_dump(mut self, enabled: bool) -> Self {
        self.debug_dump = enabled;
        self
    }

    /// Builds the cache, creating its directory if absent.
    pub fn build(self) -> Result<DfCache> {
        let path = self.path.ok_or_else(|| {
            DfCacheError::InvalidConfiguration("cache path is required".to_string())
        })?;

        let empty_lookback = TimeDelta::from_std(self.empty_lookback).map_err(|_| {
            DfCacheError::InvalidConfiguration(format!(
                "empty lookback {:?} is out of range",
                self.empty_lookback
            ))
        })?;

        let dir = PartitionDirectory::open(&path)?;
        info!("Opened partition cache at {:?}", dir.root());

        Ok(DfCache {
            dir,
            empty_lookback,
            debug_dump: self.debug_dump,
        })
    }
}

/// Options for [`DfCache::fetch`] and [`DfCache::fetch_latest`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchOptions {
    /// Split the requested range into chunks of this length.
    pub step: Option<Duration>,
    /// Deduplicate the stitched result on these columns.
    pub dedup_columns: Option<Vec<String>>,
}

impl FetchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch in chunks of `step`.
    pub fn with_step(mut self, step: Duration) -> Self {
        self.step = Some(step);
        self
    }

    /// Deduplicate on `columns`; an empty list compares whole rows.
    pub fn with_dedup_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dedup_columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    fn dedup_keys(&self) -> Option<Vec<&str>> {
        self.dedup_columns
            .as_ref()
            .map(|columns| columns.iter().map(String::as_str).collect())
    }
}

/// Summary of a cache directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheInfo {
    pub path: PathBuf,
    pub files: usize,
    pub total_bytes: u64,
    pub total_rows: usize,
    pub oldest: Option<Timestamp>,
    pub newest: Option<Timestamp>,
}

/// A file-backed cache of time-series frames, partitioned by covered interval.
///
/// The cache is single-writer: nothing guards the directory against
/// concurrent `store`/`drop_range` calls from other processes.
#[derive(Debug)]
pub struct DfCache {
    dir: PartitionDirectory,
    empty_lookback: TimeDelta,
    debug_dump: bool,
}

impl DfCache {
    /// Creates a builder.
    pub fn builder() -> DfCacheBuilder {
        DfCacheBuilder::new()
    }

    /// Opens a cache at `path` with default settings.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        DfCacheBuilder::new().with_path(path).build()
    }

    pub fn path(&self) -> &Path {
        self.dir.root()
    }

    /// Start of the earliest partition, or `None` for an empty cache.
    pub fn oldest(&self) -> Result<Option<Timestamp>> {
        self.dir.oldest()
    }

    /// End of the latest partition, or `None` for an empty cache.
    pub fn newest(&self) -> Result<Option<Timestamp>> {
        self.dir.newest()
    }

    /// All parseable partition files, ordered by interval.
    pub fn partitions(&self) -> Result<Vec<PartitionFile>> {
        self.dir.partitions()
    }

    /// See [`PartitionDirectory::files_in_range`].
    pub fn files_in_range(
        &self,
        start: Option<Timestamp>,
        end: Option<Timestamp>,
        contained: bool,
    ) -> Result<Vec<PartitionFile>> {
        self.dir.files_in_range(start, end, contained)
    }

    fn dump(&self, what: &str, frame: &Frame) {
        if self.debug_dump {
            debug!(rows = frame.len(), columns = frame.columns().len(), "{}: {}", what, frame);
        }
    }

    /// Returns the cached rows in `[start, end]`.
    ///
    /// Missing bounds default to the cache's oldest/newest. Returns `None` if
    /// the cache is empty or nothing falls in the window.
    pub fn get(
        &self,
        start: Option<Timestamp>,
        end: Option<Timestamp>,
        dedup_columns: Option<&[&str]>,
    ) -> Result<Option<Frame>> {
        let partitions = self.dir.partitions()?;
        let (Some(oldest), Some(newest)) = (
            partitions.iter().map(|p| p.start).min(),
            partitions.iter().map(|p| p.end).max(),
        ) else {
            debug!("Cache at {:?} is empty", self.path());
            return Ok(None);
        };

        let start = start.unwrap_or(oldest);
        let end = end.unwrap_or(newest);
        if start > end {
            debug!(start = %start, end = %end, "empty read window");
            return Ok(None);
        }

        let frames = partitions
            .iter()
            .filter(|p| p.intersects(&start, &end))
            .map(|p| self.dir.read(p))
            .collect::<Result<Vec<Frame>>>()?;
        let files = frames.len();

        let Some(joined) = Frame::concat(frames)? else {
            return Ok(None);
        };

        let mut frame = joined.filter_range(start, end).sort_by_index();
        if let Some(keys) = dedup_columns {
            frame = dedup(&frame, keys)?;
        }

        debug!(files, rows = frame.len(), "cache_read");
        self.dump("get", &frame);

        if frame.is_empty() {
            return Ok(None);
        }
        Ok(Some(frame))
    }

    /// Writes `frame` as a new partition, replacing one with the same interval.
    ///
    /// The frame must already be sorted by time; its first and last index
    /// values name the partition.
    pub fn store(&self, frame: &Frame) -> Result<PartitionFile> {
        if !frame.is_sorted() {
            warn!("Storing a frame whose index is not sorted; partition bounds may be wrong");
        }

        let partition = self.dir.write(frame)?;
        debug!(rows = frame.len(), bytes = partition.size, "Stored partition {:?}", partition.path);
        self.dump("store", frame);
        Ok(partition)
    }

    /// Deletes every partition lying entirely inside `[start, end]`.
    ///
    /// Partitions that only overlap the range are kept. Returns the number of
    /// files removed.
    pub fn drop_range(&self, start: Option<Timestamp>, end: Option<Timestamp>) -> Result<usize> {
        let partitions = self.dir.files_in_range(start, end, true)?;
        for partition in &partitions {
            self.dir.remove(partition)?;
        }

        if !partitions.is_empty() {
            info!("Dropped {} partitions from {:?}", partitions.len(), self.path());
        }
        Ok(partitions.len())
    }

    /// Deletes every partition.
    pub fn clear(&self) -> Result<usize> {
        self.drop_range(None, None)
    }

    /// Fetches `[start, end]` through `query`, storing what it returns.
    ///
    /// Without a step, `query` is called once and its result stored and
    /// returned. With a step, the range is walked in chunks; each chunk starts
    /// where the previous returned data ended, and the final result is read
    /// back from the cache so it includes anything already stored.
    ///
    /// `params` is handed to every `query` call untouched.
    pub fn fetch<P, F>(
        &self,
        mut query: F,
        start: Timestamp,
        end: Timestamp,
        options: &FetchOptions,
        params: &P,
    ) -> Result<Option<Frame>>
    where
        P: ?Sized,
        F: FnMut(Timestamp, Timestamp, &P) -> Result<Option<Frame>>,
    {
        let keys = options.dedup_keys();

        let Some(step) = options.step else {
            return match query(start, end, params)? {
                Some(frame) if !frame.is_empty() => {
                    self.store(&frame)?;
                    match keys {
                        Some(keys) => dedup(&frame, &keys).map(Some),
                        None => Ok(Some(frame)),
                    }
                }
                _ => {
                    info!(start = %start, end = %end, "Query returned no data");
                    Ok(None)
                }
            };
        };

        let step = TimeDelta::from_std(step)
            .ok()
            .filter(|s| *s > TimeDelta::zero())
            .ok_or_else(|| {
                DfCacheError::InvalidConfiguration(format!("fetch step {step:?} is not usable"))
            })?;

        let mut last = start;
        let mut t = start;
        let mut chunks = 0usize;

        while t < end {
            let chunk_end = t.checked_add_signed(step).ok_or_else(|| {
                DfCacheError::InvalidConfiguration(format!(
                    "fetch step {step} from {t} leaves the representable time range"
                ))
            })?;
            let chunk_start = t.max(last);

            if chunk_start >= chunk_end {
                debug!(chunk_start = %chunk_start, chunk_end = %chunk_end, "Chunk already covered");
                t = chunk_end;
                continue;
            }

            chunks += 1;
            match query(chunk_start, chunk_end, params)? {
                Some(frame) if !frame.is_empty() => {
                    self.store(&frame)?;
                    last = frame.index().iter().copied().max().unwrap_or(chunk_end);
                }
                _ => {
                    debug!(chunk_start = %chunk_start, chunk_end = %chunk_end, "Chunk returned no data");
                    last = chunk_end;
                }
            }
            t = chunk_end;
        }

        debug!(chunks, "fetch_complete");
        self.get(Some(start), Some(end), keys.as_deref())
    }

    /// Fetches everything newer than the cache, up to the current minute.
    pub fn fetch_latest<P, F>(
        &self,
        query: F,
        options: &FetchOptions,
        params: &P,
    ) -> Result<Option<Frame>>
    where
        P: ?Sized,
        F: FnMut(Timestamp, Timestamp, &P) -> Result<Option<Frame>>,
    {
        self.fetch_latest_at(Utc::now().fixed_offset(), query, options, params)
    }

    /// Like [`fetch_latest`](Self::fetch_latest) with an explicit current time.
    pub fn fetch_latest_at<P, F>(
        &self,
        now: Timestamp,
        query: F,
        options: &FetchOptions,
        params: &P,
    ) -> Result<Option<Frame>>
    where
        P: ?Sized,
        F: FnMut(Timestamp, Timestamp, &P) -> Result<Option<Frame>>,
    {
        let end = now
            .duration_trunc(TimeDelta::minutes(1))
            .map_err(|e| {
                DfCacheError::InvalidConfiguration(format!("cannot truncate {}: {}", now, e))
            })?;

        let start = match self.newest()? {
            Some(newest) => newest,
            None => end.checked_sub_signed(self.empty_lookback).ok_or_else(|| {
                DfCacheError::InvalidConfiguration(format!(
                    "empty lookback {} before {} leaves the representable time range",
                    self.empty_lookback, end
                ))
            })?,
        };

        if start >= end {
            debug!(newest = %start, end = %end, "Cache is already current");
            return Ok(None);
        }

        self.fetch(query, start, end, options, params)
    }

    /// Collects file count, size and bounds of the cache.
    pub fn stats(&self) -> Result<CacheInfo> {
        let partitions = self.dir.partitions()?;

        let mut total_rows = 0;
        for partition in &partitions {
            match self.dir.read_meta(partition) {
                Ok(meta) => total_rows += meta.num_rows,
                Err(e) => warn!("Cannot read header of {:?}: {}", partition.path, e),
            }
        }

        Ok(CacheInfo {
            path: self.path().to_path_buf(),
            files: partitions.len(),
            total_bytes: partitions.iter().map(|p| p.size).sum(),
            total_rows,
            oldest: partitions.iter().map(|p| p.start).min(),
            newest: partitions.iter().map(|p| p.end).max(),
        })
    }

    /// Writes a human-readable summary of the cache to `out`.
    pub fn info<W: Write>(&self, out: &mut W) -> Result<()> {
        let stats = self.stats()?;
        let bound = |t: Option<Timestamp>| t.map_or_else(|| "-".to_string(), |t| t.to_rfc3339());

        writeln!(out, "path:   {}", stats.path.display())?;
        writeln!(out, "files:  {}", stats.files)?;
        writeln!(out, "size:   {} bytes", stats.total_bytes)?;
        writeln!(out, "rows:   {}", stats.total_rows)?;
        writeln!(out, "oldest: {}", bound(stats.oldest))?;
        writeln!(out, "newest: {}", bound(stats.newest))?;
        Ok(())
    }
}
