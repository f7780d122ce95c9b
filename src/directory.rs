//! Partition directory: the set of partition files under one root path.

use crate::chunk::{ChunkMeta, read_chunk_file, read_chunk_meta, write_chunk_file};
use crate::frame::Frame;
use crate::interval::{PARTITION_EXTENSION, PartitionFile, partition_file_name};
use crate::{DfCacheError, Result, Timestamp};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A directory of immutable, time-named partition files.
#[derive(Debug, Clone)]
pub struct PartitionDirectory {
    root: PathBuf,
}

impl PartitionDirectory {
    /// Opens the directory at `root`, creating it if absent.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();

        if root.exists() && !root.is_dir() {
            return Err(DfCacheError::NotADirectory {
                path: root.to_path_buf(),
            });
        }
        fs::create_dir_all(root).map_err(|e| DfCacheError::io_at(root, e))?;

        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lists every parseable partition file, ordered by `(start, end)`.
    ///
    /// Files with another extension are ignored; partition files whose names
    /// do not parse are skipped.
    pub fn partitions(&self) -> Result<Vec<PartitionFile>> {
        let entries = fs::read_dir(&self.root).map_err(|e| DfCacheError::io_at(&self.root, e))?;
        let mut partitions = Vec::new();

        for entry in entries {
            let entry = entry?;
            let path = entry.path();

            let is_partition = path
                .extension()
                .map(|ext| ext == PARTITION_EXTENSION)
                .unwrap_or(false);
            if !is_partition || !entry.file_type()?.is_file() {
                continue;
            }

            let size = entry.metadata()?.len();
            if let Some(partition) = PartitionFile::from_path(&path, size) {
                partitions.push(partition);
            }
        }

        partitions.sort_by(|a, b| (a.start, a.end, &a.path).cmp(&(b.start, b.end, &b.path)));
        Ok(partitions)
    }

    /// Start of the earliest partition.
    pub fn oldest(&self) -> Result<Option<Timestamp>> {
        Ok(self.partitions()?.iter().map(|p| p.start).min())
    }

    /// End of the latest partition.
    pub fn newest(&self) -> Result<Option<Timestamp>> {
        Ok(self.partitions()?.iter().map(|p| p.end).max())
    }

    /// Returns the partitions relevant to a query range.
    ///
    /// Missing bounds default to the directory's oldest/newest. With
    /// `contained`, only partitions lying entirely within the range are
    /// returned; otherwise any partition with `start <= end && file.end > start`.
    pub fn files_in_range(
        &self,
        start: Option<Timestamp>,
        end: Option<Timestamp>,
        contained: bool,
    ) -> Result<Vec<PartitionFile>> {
        if let (Some(start), Some(end)) = (start, end)
            && start >= end
        {
            return Err(DfCacheError::InvalidTimeRange { start, end });
        }

        let partitions = self.partitions()?;
        let (Some(oldest), Some(newest)) = (
            partitions.iter().map(|p| p.start).min(),
            partitions.iter().map(|p| p.end).max(),
        ) else {
            return Ok(Vec::new());
        };

        let start = start.unwrap_or(oldest);
        let end = end.unwrap_or(newest);

        let selected: Vec<PartitionFile> = partitions
            .into_iter()
            .filter(|p| {
                if contained {
                    p.contained_in(&start, &end)
                } else {
                    p.overlaps(&start, &end)
                }
            })
            .collect();

        debug!(
            files = selected.len(),
            contained,
            start = %start,
            end = %end,
            "partition_range_selected"
        );
        Ok(selected)
    }

    /// Writes `frame` as a new partition named from its first and last timestamps.
    pub fn write(&self, frame: &Frame) -> Result<PartitionFile> {
        let (Some(start), Some(end)) = (frame.first_timestamp(), frame.last_timestamp()) else {
            return Err(DfCacheError::EmptyFrame);
        };

        let path = self.root.join(partition_file_name(&start, &end));
        let size = write_chunk_file(&path, frame)?;

        Ok(PartitionFile {
            path,
            start,
            end,
            size,
        })
    }

    /// Reads the frame stored in `partition`.
    pub fn read(&self, partition: &PartitionFile) -> Result<Frame> {
        read_chunk_file(&partition.path).map(|(_, frame)| frame)
    }

    /// Reads only the header of `partition`.
    pub fn read_meta(&self, partition: &PartitionFile) -> Result<ChunkMeta> {
        read_chunk_meta(&partition.path)
    }

    /// Deletes `partition` from disk.
    pub fn remove(&self, partition: &PartitionFile) -> Result<()> {
        fs::remove_file(&partition.path).map_err(|e| DfCacheError::io_at(&partition.path, e))
    }
}
