//! Atomic file writes for crash safety
//!
//! Records are written to a uniquely named sibling temp file, flushed, and
//! renamed over the final path, so a reader only ever observes the previous
//! or the new complete record.

use blake3::Hasher;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::errors::{Result, StoreError};

/// Marker embedded in temp file names, used by recovery to find leftovers
pub(crate) const TEMP_MARKER: &str = ".tmp.";

/// Fsync policy for controlling write durability vs performance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsyncPolicy {
    /// Fsync the file and its directory on every commit
    Always,
    /// Let the OS decide when data reaches the disk (tests, throwaway stores)
    Never,
}

/// Atomic file writer
pub struct AtomicWriter {
    final_path: PathBuf,
    temp_path: PathBuf,
    file: Option<fs::File>,
    hasher: Hasher,
    bytes_written: u64,
    fsync: FsyncPolicy,
}

impl AtomicWriter {
    /// Create a new atomic writer for the given path
    pub async fn new(path: impl AsRef<Path>, fsync: FsyncPolicy) -> Result<Self> {
        let final_path = path.as_ref().to_path_buf();
        let file_name = final_path
            .file_name()
            .and_then(|s| s.to_str())
            .ok_or_else(|| StoreError::AtomicWriteFailed(format!("bad path {:?}", final_path)))?;
        let temp_path = final_path.with_file_name(format!(
            "{}{}{}",
            file_name,
            TEMP_MARKER,
            uuid::Uuid::new_v4().simple()
        ));

        if let Some(parent) = temp_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let file = fs::File::create(&temp_path).await?;

        Ok(Self {
            final_path,
            temp_path,
            file: Some(file),
            hasher: Hasher::new(),
            bytes_written: 0,
            fsync,
        })
    }

    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| StoreError::InvalidOperation("Writer already finalized".to_string()))?;
        file.write_all(data).await?;
        self.hasher.update(data);
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    /// Finalize the write atomically
    pub async fn commit(mut self) -> Result<AtomicWriteResult> {
        let mut file = self
            .file
            .take()
            .ok_or_else(|| StoreError::InvalidOperation("Writer already finalized".to_string()))?;

        file.flush().await?;
        if self.fsync == FsyncPolicy::Always {
            file.sync_all().await?;
        }
        drop(file);

        if let Err(e) = fs::rename(&self.temp_path, &self.final_path).await {
            let _ = fs::remove_file(&self.temp_path).await;
            return Err(StoreError::AtomicWriteFailed(format!(
                "rename to {}: {}",
                self.final_path.display(),
                e
            )));
        }

        if self.fsync == FsyncPolicy::Always {
            if let Some(parent) = self.final_path.parent() {
                // Directory fsync makes the rename itself durable
                if let Ok(dir) = fs::File::open(parent).await {
                    let _ = dir.sync_all().await;
                }
            }
        }

        let hash = self.hasher.finalize();
        debug!(
            "Committed {} ({} bytes)",
            self.final_path.display(),
            self.bytes_written
        );

        Ok(AtomicWriteResult {
            path: self.final_path.clone(),
            bytes_written: self.bytes_written,
            content_hash: hash,
        })
    }

    /// Abort the write and clean up
    pub async fn abort(mut self) -> Result<()> {
        if self.file.take().is_some() {
            if let Err(e) = fs::remove_file(&self.temp_path).await {
                warn!(
                    "Failed to cleanup temp file {}: {}",
                    self.temp_path.display(),
                    e
                );
            }
        }
        Ok(())
    }
}

impl Drop for AtomicWriter {
    fn drop(&mut self) {
        // Dropped without commit/abort (e.g. an error between writes)
        if self.file.take().is_some() {
            let _ = std::fs::remove_file(&self.temp_path);
        }
    }
}

/// Result of successful atomic write
#[derive(Debug, Clone)]
pub struct AtomicWriteResult {
    pub path: PathBuf,
    pub bytes_written: u64,
    pub content_hash: blake3::Hash,
}

/// Write `data` to `path` in one atomic step
pub async fn write_atomic(
    path: impl AsRef<Path>,
    data: &[u8],
    fsync: FsyncPolicy,
) -> Result<AtomicWriteResult> {
    let mut writer = AtomicWriter::new(path, fsync).await?;
    if let Err(e) = writer.write(data).await {
        writer.abort().await?;
        return Err(e);
    }
    writer.commit().await
}

/// Whether a file name belongs to an interrupted atomic write
pub(crate) fn is_temp_file(name: &str) -> bool {
    match name.rfind(TEMP_MARKER) {
        Some(idx) => {
            let suffix = &name[idx + TEMP_MARKER.len()..];
            suffix.len() == 32 && suffix.chars().all(|c| c.is_ascii_hexdigit())
        }
        None => false,
    }
}
