//! Read-only memory mapping of partition files.

use memmap2::{Mmap, MmapOptions};
use std::fs::File;
use std::io;
use std::path::Path;

/// Maximum map size for different architectures
#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
pub const MAX_MAP_SIZE: usize = usize::MAX;

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
pub const MAX_MAP_SIZE: usize = 0x7FFFFFFF; // 2GB on 32-bit and unknown targets

/// A read-only mapping that keeps its file handle alive.
pub struct PlatformMmap {
    mmap: Mmap,
    #[allow(dead_code)]
    file: File,
}

impl PlatformMmap {
    /// Maps the whole file at `path`.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        let length = file.metadata()?.len() as usize;
        Self::new_readonly(file, length)
    }

    /// Maps the first `length` bytes of `file`.
    pub fn new_readonly(file: File, length: usize) -> io::Result<Self> {
        if length > MAX_MAP_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "Map size {} exceeds maximum {} for this architecture",
                    length, MAX_MAP_SIZE
                ),
            ));
        }

        let mmap = unsafe { MmapOptions::new().len(length).map(&file)? };

        Ok(PlatformMmap { mmap, file })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.mmap[..]
    }

    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_platform_mmap() -> io::Result<()> {
        let mut temp_file = NamedTempFile::new()?;
        let data = b"partition bytes";
        temp_file.write_all(data)?;
        temp_file.flush()?;

        let mmap = PlatformMmap::open(temp_file.path())?;

        assert_eq!(mmap.len(), data.len());
        assert_eq!(mmap.as_slice(), data);

        Ok(())
    }
}
