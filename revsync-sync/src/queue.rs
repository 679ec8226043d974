//! Offline queue: writes that cannot reach the server are kept, never dropped
//!
//! Pending pushes are a set of project ids; they are retried naturally by the
//! next plan negotiation, since an unconfirmed local edit looks exactly like a
//! project that needs pushing. Pending uploads are a list of entries backed by
//! temp files that survive restarts.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use revsync_proto::{PendingBillUpload, Validator};
use revsync_store::LocalStore;

use crate::errors::Result;

#[derive(Clone)]
pub struct OfflineQueue {
    store: Arc<LocalStore>,
}

impl OfflineQueue {
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self { store }
    }

    /// Idempotent: returns false if the id was already queued
    pub async fn enqueue_push(&self, project_id: &str) -> Result<bool> {
        let added = self.store.add_pending_push(project_id).await?;
        if added {
            debug!("Queued push for {}", project_id);
        }
        Ok(added)
    }

    pub async fn dequeue_push(&self, project_id: &str) -> Result<bool> {
        Ok(self.store.remove_pending_push(project_id).await?)
    }

    pub async fn is_push_pending(&self, project_id: &str) -> Result<bool> {
        Ok(self.store.is_pending_push(project_id).await?)
    }

    pub async fn pending_pushes(&self) -> Result<Vec<String>> {
        Ok(self.store.pending_pushes().await?)
    }

    /// Copy upload bytes to a durable temp file and queue the upload.
    ///
    /// The temp file is fully written before the entry is appended, so an
    /// entry never references a file that was not there when it was queued.
    pub async fn enqueue_upload(
        &self,
        project_id: &str,
        data: &[u8],
        original_filename: &str,
    ) -> Result<PendingBillUpload> {
        Validator::validate_id(project_id)?;
        let temp_id = format!("upload-{}", uuid::Uuid::new_v4().simple());
        let temp_path = self.store.write_upload_temp(&temp_id, data).await?;

        let entry = PendingBillUpload {
            temp_id,
            project_id: project_id.to_string(),
            temp_path,
            original_filename: original_filename.to_string(),
            queued_at: Utc::now(),
        };

        if let Err(e) = self.store.append_pending_upload(&entry).await {
            let _ = self.store.remove_upload_temp(&entry.temp_path).await;
            return Err(e.into());
        }

        info!(
            "Queued upload of {} for project {} ({} bytes)",
            entry.original_filename,
            entry.project_id,
            data.len()
        );
        Ok(entry)
    }

    pub async fn pending_uploads(&self) -> Result<Vec<PendingBillUpload>> {
        Ok(self.store.pending_uploads().await?)
    }

    /// Bytes of a queued upload, `None` if the temp file has gone missing
    pub async fn read_upload(&self, entry: &PendingBillUpload) -> Result<Option<Vec<u8>>> {
        Ok(self.store.read_upload_temp(&entry.temp_path).await?)
    }

    /// Drop an upload after it was confirmed by the server.
    ///
    /// The entry goes first: a crash in between leaves a stray temp file,
    /// never an entry pointing at nothing.
    pub async fn complete_upload(&self, entry: &PendingBillUpload) -> Result<()> {
        self.store.remove_pending_upload(&entry.temp_id).await?;
        if !self.store.remove_upload_temp(&entry.temp_path).await? {
            warn!(
                "Temp file for upload {} was already gone",
                entry.temp_id
            );
        }
        Ok(())
    }

    /// Explicitly give up on a queued upload
    pub async fn discard_upload(&self, temp_id: &str) -> Result<bool> {
        match self.store.remove_pending_upload(temp_id).await? {
            Some(entry) => {
                self.store.remove_upload_temp(&entry.temp_path).await?;
                info!(
                    "Discarded queued upload {} for project {}",
                    entry.temp_id, entry.project_id
                );
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
