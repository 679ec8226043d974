//! Singleton records: sync status, persons cache, pending-push set and the
//! pending-upload list, plus the temp files backing queued uploads

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::debug;

use revsync_proto::{PendingBillUpload, SyncStatus, Validator};

use crate::atomic::write_atomic;
use crate::errors::Result;
use crate::store::{read_if_exists, remove_if_exists, LocalStore, META_DIR, UPLOADS_DIR};

const SYNC_STATUS_FILE: &str = "sync_status.json";
const PERSONS_FILE: &str = "persons.json";
const PENDING_PUSH_FILE: &str = "pending_push.json";
const PENDING_UPLOADS_FILE: &str = "pending_uploads.json";

impl LocalStore {
    fn meta_path(&self, file: &str) -> PathBuf {
        self.dir(META_DIR).join(file)
    }

    /// Last recorded sync status; defaults when never written
    pub async fn load_sync_status(&self) -> Result<SyncStatus> {
        Ok(self
            .read_json(&self.meta_path(SYNC_STATUS_FILE))
            .await?
            .unwrap_or_default())
    }

    pub async fn save_sync_status(&self, status: &SyncStatus) -> Result<()> {
        let _guard = self.meta_lock.lock().await;
        self.write_json(&self.meta_path(SYNC_STATUS_FILE), status)
            .await
    }

    /// Denormalized list of known person filter values
    pub async fn load_persons(&self) -> Result<Vec<String>> {
        Ok(self
            .read_json(&self.meta_path(PERSONS_FILE))
            .await?
            .unwrap_or_default())
    }

    pub async fn save_persons(&self, persons: &[String]) -> Result<()> {
        let _guard = self.meta_lock.lock().await;
        self.write_json(&self.meta_path(PERSONS_FILE), &persons)
            .await
    }

    async fn read_pending_push(&self) -> Result<BTreeSet<String>> {
        Ok(self
            .read_json(&self.meta_path(PENDING_PUSH_FILE))
            .await?
            .unwrap_or_default())
    }

    /// Mark a project as awaiting push. Set semantics: returns `false` and
    /// writes nothing when the id is already present.
    pub async fn add_pending_push(&self, id: &str) -> Result<bool> {
        Validator::validate_id(id)?;
        let _guard = self.meta_lock.lock().await;

        let mut pending = self.read_pending_push().await?;
        if !pending.insert(id.to_string()) {
            return Ok(false);
        }
        self.write_json(&self.meta_path(PENDING_PUSH_FILE), &pending)
            .await?;
        debug!("Marked {} pending push ({} total)", id, pending.len());
        Ok(true)
    }

    pub async fn remove_pending_push(&self, id: &str) -> Result<bool> {
        let _guard = self.meta_lock.lock().await;

        let mut pending = self.read_pending_push().await?;
        if !pending.remove(id) {
            return Ok(false);
        }
        self.write_json(&self.meta_path(PENDING_PUSH_FILE), &pending)
            .await?;
        Ok(true)
    }

    pub async fn is_pending_push(&self, id: &str) -> Result<bool> {
        Ok(self.read_pending_push().await?.contains(id))
    }

    pub async fn pending_pushes(&self) -> Result<Vec<String>> {
        Ok(self.read_pending_push().await?.into_iter().collect())
    }

    pub async fn pending_uploads(&self) -> Result<Vec<PendingBillUpload>> {
        Ok(self
            .read_json(&self.meta_path(PENDING_UPLOADS_FILE))
            .await?
            .unwrap_or_default())
    }

    pub async fn append_pending_upload(&self, entry: &PendingBillUpload) -> Result<()> {
        Validator::validate_id(&entry.temp_id)?;
        Validator::validate_id(&entry.project_id)?;
        let _guard = self.meta_lock.lock().await;

        let mut uploads = self.pending_uploads().await?;
        uploads.push(entry.clone());
        self.write_json(&self.meta_path(PENDING_UPLOADS_FILE), &uploads)
            .await?;
        debug!(
            "Queued upload {} for project {} ({} queued)",
            entry.temp_id,
            entry.project_id,
            uploads.len()
        );
        Ok(())
    }

    /// Remove a queued upload entry, returning it if it existed
    pub async fn remove_pending_upload(&self, temp_id: &str) -> Result<Option<PendingBillUpload>> {
        let _guard = self.meta_lock.lock().await;

        let mut uploads = self.pending_uploads().await?;
        let Some(index) = uploads.iter().position(|u| u.temp_id == temp_id) else {
            return Ok(None);
        };
        let removed = uploads.remove(index);
        self.write_json(&self.meta_path(PENDING_UPLOADS_FILE), &uploads)
            .await?;
        Ok(Some(removed))
    }

    /// Location of the temp file backing a queued upload
    pub fn upload_temp_path(&self, temp_id: &str) -> PathBuf {
        self.dir(UPLOADS_DIR).join(format!("{}.bin", temp_id))
    }

    pub async fn write_upload_temp(&self, temp_id: &str, data: &[u8]) -> Result<PathBuf> {
        Validator::validate_id(temp_id)?;
        Validator::validate_attachment_size(data.len())?;
        let path = self.upload_temp_path(temp_id);
        write_atomic(&path, data, self.config().fsync_policy).await?;
        Ok(path)
    }

    pub async fn read_upload_temp(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        read_if_exists(path).await
    }

    pub async fn remove_upload_temp(&self, path: &Path) -> Result<bool> {
        remove_if_exists(path).await
    }
}
