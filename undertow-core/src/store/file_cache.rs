//! File-based disk cache implementation

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::warn;

use super::{CacheError, DiskCache};
use crate::config::CacheConfig;

/// Disk cache that appends the resource to a single file.
///
/// The file is truncated on creation and grows one chunk at a time. Reads
/// past the written length return `None` instead of short data.
pub struct FileCache {
    path: PathBuf,
    writer: Mutex<File>,
    bytes_written: AtomicU64,
}

impl FileCache {
    /// Creates (or truncates) the cache file at `path`.
    ///
    /// # Errors
    ///
    /// - `CacheError::Io` - If the parent directory or file cannot be created
    pub async fn create(path: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let file = File::create(&path).await?;
        Ok(Self {
            path,
            writer: Mutex::new(file),
            bytes_written: AtomicU64::new(0),
        })
    }

    /// Creates a cache file named `name` inside the configured cache directory.
    ///
    /// The configured extension, if any, replaces the one on `name`.
    ///
    /// # Errors
    ///
    /// - `CacheError::Io` - If the directory or file cannot be created
    pub async fn in_dir(config: &CacheConfig, name: &str) -> Result<Self, CacheError> {
        let mut path = config.cache_dir.join(name);
        if let Some(extension) = &config.file_extension {
            path.set_extension(extension.trim_start_matches('.'));
        }
        Self::create(path).await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Acquire)
    }

    async fn read_exact_range(&self, start: u64, end: u64) -> std::io::Result<Bytes> {
        let mut file = File::open(&self.path).await?;
        file.seek(SeekFrom::Start(start)).await?;

        let mut buffer = vec![0u8; (end - start) as usize];
        file.read_exact(&mut buffer).await?;
        Ok(Bytes::from(buffer))
    }
}

#[async_trait]
impl DiskCache for FileCache {
    async fn cache_chunk(
        &self,
        chunk: Bytes,
        _bytes_downloaded: u64,
        _bytes_expected: Option<u64>,
    ) -> Result<(), CacheError> {
        let mut file = self.writer.lock().await;
        file.write_all(&chunk).await?;
        file.flush().await?;

        self.bytes_written
            .fetch_add(chunk.len() as u64, Ordering::AcqRel);
        Ok(())
    }

    async fn read_range(&self, start: u64, end: u64) -> Option<Bytes> {
        if start >= end || end > self.bytes_written() {
            return None;
        }

        match self.read_exact_range(start, end).await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(
                    "Failed to read {}..{} from {}: {}",
                    start,
                    end,
                    self.path.display(),
                    e
                );
                None
            }
        }
    }
}
