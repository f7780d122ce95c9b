//! Error types for dfcache.

use crate::Timestamp;
use crate::frame::ColumnKind;
use chrono::TimeDelta;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for dfcache operations.
pub type Result<T> = std::result::Result<T, DfCacheError>;

/// Main error type for dfcache operations.
#[derive(Error, Debug)]
pub enum DfCacheError {
    #[error("Invalid time range: start {start} >= end {end}")]
    InvalidTimeRange { start: Timestamp, end: Timestamp },

    #[error("Cache path {path:?} exists but is not a directory")]
    NotADirectory { path: PathBuf },

    #[error("Missing required column '{column}'")]
    MissingColumn { column: String },

    #[error("Column '{column}' has type {actual:?}, expected {expected:?}")]
    ColumnType {
        column: String,
        expected: ColumnKind,
        actual: ColumnKind,
    },

    #[error("Column '{column}' has {actual} rows, expected {expected}")]
    ColumnLength {
        column: String,
        expected: usize,
        actual: usize,
    },

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Cannot store an empty frame")]
    EmptyFrame,

    #[error("Non-uniform sampling: periods range from {min} to {max}; resample first")]
    NonUniformSampling { min: TimeDelta, max: TimeDelta },

    #[error("Timestamp {timestamp} cannot be represented in nanoseconds")]
    TimestampOutOfRange { timestamp: Timestamp },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid partition file: {path:?}")]
    InvalidPartition { path: PathBuf },

    #[error("Data corruption detected: {0}")]
    DataCorruption(String),

    #[error("Query function failed: {0}")]
    Query(String),

    #[error("IO error at path {path:?}: {source}")]
    IoWithPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Bincode serialization error: {0}")]
    Bincode(#[from] bincode::Error),
}

impl DfCacheError {
    /// Wraps an IO error with the path it occurred on.
    pub(crate) fn io_at(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DfCacheError::IoWithPath {
            path: path.into(),
            source,
        }
    }
}
