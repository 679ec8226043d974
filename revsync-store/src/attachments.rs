//! Attachment bytes and cached primary-image renderings

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, warn};

use revsync_proto::validation::validate_attachment;
use revsync_proto::{BillAttachment, Validator};

use crate::atomic::write_atomic;
use crate::errors::{Result, StoreError};
use crate::store::{read_if_exists, remove_if_exists, LocalStore, ATTACHMENTS_DIR, IMAGE_CACHE_DIR};

/// Metadata persisted next to an attachment's bytes.
///
/// Written after the bytes, so its presence marks a complete attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentMeta {
    pub id: String,
    pub project_id: String,
    pub size: u64,
    /// Blake3 hash of the bytes, hex encoded
    pub content_hash: String,
    pub stored_at: DateTime<Utc>,
}

impl LocalStore {
    fn attachment_data_path(&self, id: &str) -> PathBuf {
        self.dir(ATTACHMENTS_DIR).join(format!("{}.bin", id))
    }

    fn attachment_meta_path(&self, id: &str) -> PathBuf {
        self.dir(ATTACHMENTS_DIR).join(format!("{}.json", id))
    }

    fn cached_image_path(&self, project_id: &str) -> PathBuf {
        self.dir(IMAGE_CACHE_DIR).join(format!("{}.bin", project_id))
    }

    pub async fn save_attachment(&self, attachment: &BillAttachment) -> Result<AttachmentMeta> {
        validate_attachment(attachment)?;

        let written = write_atomic(
            self.attachment_data_path(&attachment.id),
            &attachment.data,
            self.config().fsync_policy,
        )
        .await?;

        let meta = AttachmentMeta {
            id: attachment.id.clone(),
            project_id: attachment.project_id.clone(),
            size: written.bytes_written,
            content_hash: written.content_hash.to_hex().to_string(),
            stored_at: Utc::now(),
        };
        self.write_json(&self.attachment_meta_path(&attachment.id), &meta)
            .await?;

        debug!(
            "Saved attachment {} for project {} ({} bytes)",
            meta.id, meta.project_id, meta.size
        );
        Ok(meta)
    }

    pub async fn attachment_meta(&self, id: &str) -> Result<Option<AttachmentMeta>> {
        Validator::validate_id(id)?;
        self.read_json(&self.attachment_meta_path(id)).await
    }

    /// Load an attachment, verifying its bytes against the stored hash
    pub async fn load_attachment(&self, id: &str) -> Result<Option<BillAttachment>> {
        let Some(meta) = self.attachment_meta(id).await? else {
            return Ok(None);
        };

        let Some(data) = read_if_exists(&self.attachment_data_path(id)).await? else {
            warn!("Attachment {} has metadata but no data file", id);
            return Ok(None);
        };

        let actual = blake3::hash(&data).to_hex().to_string();
        if actual != meta.content_hash {
            return Err(StoreError::CorruptRecord(format!(
                "attachment {} hash mismatch: expected {}, got {}",
                id, meta.content_hash, actual
            )));
        }

        Ok(Some(BillAttachment {
            id: meta.id,
            project_id: meta.project_id,
            data,
        }))
    }

    pub async fn has_attachment(&self, id: &str) -> Result<bool> {
        Ok(self.attachment_meta(id).await?.is_some())
    }

    /// Remove an attachment; returns whether anything was removed
    pub async fn delete_attachment(&self, id: &str) -> Result<bool> {
        Validator::validate_id(id)?;
        // Metadata first so a crash in between never leaves a "complete"
        // attachment with missing bytes
        let meta_removed = remove_if_exists(&self.attachment_meta_path(id)).await?;
        let data_removed = remove_if_exists(&self.attachment_data_path(id)).await?;
        Ok(meta_removed || data_removed)
    }

    /// Ids of attachments whose metadata names `project_id` as owner
    pub async fn attachments_owned_by(&self, project_id: &str) -> Result<Vec<String>> {
        let mut owned = Vec::new();
        for id in self.list_ids(ATTACHMENTS_DIR, "json").await? {
            match self.attachment_meta(&id).await {
                Ok(Some(meta)) if meta.project_id == project_id => owned.push(meta.id),
                Ok(_) => {}
                Err(e) => warn!("Unreadable attachment metadata {}: {}", id, e),
            }
        }
        owned.sort();
        Ok(owned)
    }

    pub async fn list_attachment_ids(&self) -> Result<Vec<String>> {
        let mut ids = self.list_ids(ATTACHMENTS_DIR, "json").await?;
        ids.sort();
        Ok(ids)
    }

    pub async fn save_cached_image(&self, project_id: &str, data: &[u8]) -> Result<()> {
        Validator::validate_id(project_id)?;
        Validator::validate_attachment_size(data.len())?;
        write_atomic(
            self.cached_image_path(project_id),
            data,
            self.config().fsync_policy,
        )
        .await?;
        Ok(())
    }

    pub async fn load_cached_image(&self, project_id: &str) -> Result<Option<Vec<u8>>> {
        Validator::validate_id(project_id)?;
        read_if_exists(&self.cached_image_path(project_id)).await
    }

    pub async fn delete_cached_image(&self, project_id: &str) -> Result<bool> {
        Validator::validate_id(project_id)?;
        remove_if_exists(&self.cached_image_path(project_id)).await
    }
}
