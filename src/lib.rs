//! dfcache - A file-backed cache for time-series frames
//!
//! dfcache keeps query results on disk as immutable partition files, each
//! named by the interval it covers. Reads stitch the overlapping partitions
//! back together; fetches call a user query only for the ranges the cache
//! does not hold yet. A small analytics layer on top finds links whose
//! utilization stays suspiciously flat.

pub mod bstream;
pub mod cache;
pub mod chunk;
pub mod dedup;
pub mod directory;
pub mod encoding;
pub mod error;
pub mod flatness;
pub mod frame;
pub mod interval;
pub mod mmap;
pub mod stats;

pub use cache::{CacheInfo, DfCache, DfCacheBuilder, FetchOptions};
pub use dedup::dedup;
pub use error::{DfCacheError, Result};
pub use flatness::{
    FlatnessConfig, FlatnessResult, Interval, analyze_flatness, flatness_analysis,
    total_flat_duration,
};
pub use frame::{Column, ColumnKind, Frame};
pub use interval::PartitionFile;
pub use stats::{
    DataKind, LinkSpeedLookup, LinkStats, compute_link_bandwidth, compute_link_utilization,
    compute_stats, derive_link_column, link_id, resample, sampling_period,
};

/// Timezone-aware instant used for every index value and partition bound.
pub type Timestamp = chrono::DateTime<chrono::FixedOffset>;
