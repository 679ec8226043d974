//! Startup recovery and storage statistics

use tokio::fs;
use tracing::{debug, trace, warn};

use crate::atomic::is_temp_file;
use crate::errors::Result;
use crate::store::{
    remove_if_exists, LocalStore, ATTACHMENTS_DIR, IMAGE_CACHE_DIR, META_DIR, PROJECTS_DIR,
    UPLOADS_DIR,
};

/// Statistics from recovery operations
#[derive(Debug, Clone, Default)]
pub struct RecoveryStats {
    /// Interrupted writes and incomplete attachments removed
    pub cleaned: usize,
    /// Temp ids of queued uploads whose temp file no longer exists
    pub orphaned_uploads: Vec<String>,
    /// Errors encountered during recovery
    pub errors: Vec<String>,
}

/// Storage statistics for the local store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageStats {
    pub project_count: usize,
    pub closed_project_count: usize,
    pub attachment_count: usize,
    pub attachment_bytes: u64,
    pub cached_image_count: usize,
    pub pending_push_count: usize,
    pub pending_upload_count: usize,
    pub pending_upload_bytes: u64,
}

impl LocalStore {
    /// Remove leftovers of interrupted writes and report queued uploads that
    /// lost their temp file.
    ///
    /// Orphaned upload entries are reported, not removed: an entry only
    /// leaves the queue after a confirmed upload or an explicit discard.
    pub async fn recover(&self) -> Result<RecoveryStats> {
        let mut stats = RecoveryStats::default();

        for dir in [
            PROJECTS_DIR,
            ATTACHMENTS_DIR,
            IMAGE_CACHE_DIR,
            UPLOADS_DIR,
            META_DIR,
        ] {
            let mut entries = match fs::read_dir(self.dir(dir)).await {
                Ok(entries) => entries,
                Err(e) => {
                    stats.errors.push(format!("Failed to read {}: {}", dir, e));
                    continue;
                }
            };

            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().to_string();
                if !is_temp_file(&name) {
                    continue;
                }
                match fs::remove_file(entry.path()).await {
                    Ok(()) => {
                        stats.cleaned += 1;
                        trace!("Removed interrupted write {}/{}", dir, name);
                    }
                    Err(e) => stats.errors.push(format!("Failed to remove {}: {}", name, e)),
                }
            }
        }

        // Bytes without metadata are an attachment whose save never finished
        for id in self.list_ids(ATTACHMENTS_DIR, "bin").await? {
            if self.attachment_meta(&id).await.ok().flatten().is_none() {
                let path = self.dir(ATTACHMENTS_DIR).join(format!("{}.bin", id));
                if remove_if_exists(&path).await? {
                    stats.cleaned += 1;
                    debug!("Removed incomplete attachment {}", id);
                }
            }
        }

        for upload in self.pending_uploads().await? {
            if !fs::try_exists(&upload.temp_path).await.unwrap_or(false) {
                warn!(
                    "Queued upload {} for project {} is missing its temp file {}",
                    upload.temp_id,
                    upload.project_id,
                    upload.temp_path.display()
                );
                stats.orphaned_uploads.push(upload.temp_id);
            }
        }

        Ok(stats)
    }

    /// Walks the store to count records and bytes
    pub async fn stats(&self) -> Result<StorageStats> {
        let mut stats = StorageStats::default();

        for project in self.list_projects().await? {
            stats.project_count += 1;
            if project.is_closed {
                stats.closed_project_count += 1;
            }
        }

        for id in self.list_attachment_ids().await? {
            if let Some(meta) = self.attachment_meta(&id).await? {
                stats.attachment_count += 1;
                stats.attachment_bytes += meta.size;
            }
        }

        stats.cached_image_count = self.list_ids(IMAGE_CACHE_DIR, "bin").await?.len();
        stats.pending_push_count = self.pending_pushes().await?.len();

        for upload in self.pending_uploads().await? {
            stats.pending_upload_count += 1;
            if let Ok(metadata) = fs::metadata(&upload.temp_path).await {
                stats.pending_upload_bytes += metadata.len();
            }
        }

        Ok(stats)
    }
}
