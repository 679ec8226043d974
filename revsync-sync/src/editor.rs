//! Client-side write operations: local edits, closing, bill uploads
//!
//! Every operation first tries the server. When the server cannot be reached
//! the write goes to the [`OfflineQueue`] and the caller gets a `Queued`
//! outcome instead of an error.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use revsync_proto::{
    BillAttachment, BillUploadRequest, CloseProjectRequest, Project, PushItem, PushRequest,
    PushStatus, Validator,
};
use revsync_store::LocalStore;

use crate::conflict::ConflictResolver;
use crate::errors::{Result, SyncError};
use crate::gateway::RemoteGateway;
use crate::queue::OfflineQueue;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "message", rename_all = "snake_case")]
pub enum EditOutcome {
    /// Confirmed by the server
    Pushed,
    /// The server held a newer version, which replaced the local edit
    Conflict,
    /// Stored locally; will sync later
    Queued,
    /// Refused by the server; the pending-push marker stays set
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    pub success: bool,
    pub queued: bool,
    pub attachment_id: Option<String>,
    /// Set when the upload went to the offline queue
    pub temp_id: Option<String>,
    pub message: String,
}

/// Result of one attempt to send bill bytes to the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum UploadAttempt {
    Uploaded(String),
    Offline,
    Rejected(String),
}

/// Send one bill and persist the confirmed attachment locally.
///
/// Shared by the online path and the offline replay so both behave the same.
pub(crate) async fn attempt_upload(
    gateway: &dyn RemoteGateway,
    store: &LocalStore,
    project_id: &str,
    original_filename: &str,
    data: Vec<u8>,
) -> Result<UploadAttempt> {
    let request = BillUploadRequest {
        project_id: project_id.to_string(),
        original_filename: original_filename.to_string(),
        data,
    };

    let response = match gateway.upload_bill(request.clone()).await {
        Ok(response) => response,
        Err(e) if e.is_offline() => return Ok(UploadAttempt::Offline),
        Err(e) => return Ok(UploadAttempt::Rejected(e.to_string())),
    };

    // Swept or deleted by the server while the upload was queued
    if !store.has_project(project_id).await? {
        info!(
            "Uploaded {} as attachment {} of {}, which is no longer stored locally",
            original_filename, response.attachment_id, project_id
        );
        return Ok(UploadAttempt::Uploaded(response.attachment_id));
    }

    store
        .save_attachment(&BillAttachment {
            id: response.attachment_id.clone(),
            project_id: project_id.to_string(),
            data: request.data,
        })
        .await?;

    if response.project.id == project_id {
        if store.is_pending_push(project_id).await? {
            // Keep unpushed local edits; the link goes out with the next push
            if let Some(mut local) = store.load_project(project_id).await? {
                if local.link_attachment(&response.attachment_id) {
                    local.touch(Utc::now());
                    store.save_project(&local).await?;
                }
            }
        } else {
            store.save_project(&response.project).await?;
        }
    } else {
        warn!(
            "Upload response for {} carried project {}",
            project_id, response.project.id
        );
    }

    info!(
        "Uploaded {} as attachment {} of {}",
        original_filename, response.attachment_id, project_id
    );
    Ok(UploadAttempt::Uploaded(response.attachment_id))
}

pub struct ProjectEditor {
    store: Arc<LocalStore>,
    gateway: Arc<dyn RemoteGateway>,
    queue: OfflineQueue,
    resolver: ConflictResolver,
}

impl ProjectEditor {
    pub fn new(store: Arc<LocalStore>, gateway: Arc<dyn RemoteGateway>) -> Self {
        Self {
            queue: OfflineQueue::new(store.clone()),
            store,
            gateway,
            resolver: ConflictResolver::new(),
        }
    }

    /// Persist a local edit and try to push it straight away.
    ///
    /// The logical version is bumped to now and never moves backwards, even
    /// if the caller edited a stale copy.
    pub async fn save_local_edit(&self, mut project: Project) -> Result<EditOutcome> {
        if let Some(marker) = self.store.modification_marker(&project.id).await? {
            if project.last_modified < marker {
                project.last_modified = marker;
            }
        }
        project.touch(Utc::now());

        self.store.save_project(&project).await?;
        self.queue.enqueue_push(&project.id).await?;
        debug!("Saved local edit of {} at {}", project.id, project.last_modified);

        self.push_now(project).await
    }

    async fn push_now(&self, mut project: Project) -> Result<EditOutcome> {
        if !self.gateway.is_online().await {
            return Ok(EditOutcome::Queued);
        }

        let id = project.id.clone();
        let request = PushRequest {
            items: vec![PushItem {
                local_last_modified: project.last_modified,
                project: project.clone(),
            }],
        };

        let response = match self.gateway.push_projects(request).await {
            Ok(response) => response,
            Err(e) if e.is_offline() => return Ok(EditOutcome::Queued),
            Err(e) => {
                warn!("Push of {} failed: {}", id, e);
                return Ok(EditOutcome::Failed(e.to_string()));
            }
        };

        let status = response
            .results
            .into_iter()
            .find(|result| result.id == id)
            .map(|result| result.status);

        match status {
            Some(PushStatus::Accepted {
                server_last_modified,
            }) => {
                project.last_modified = server_last_modified;
                self.store.save_project(&project).await?;
                self.queue.dequeue_push(&id).await?;
                Ok(EditOutcome::Pushed)
            }
            Some(PushStatus::Conflict { server_project }) if server_project.id == id => {
                self.resolver
                    .apply(&self.store, Some(&project), server_project)
                    .await?;
                Ok(EditOutcome::Conflict)
            }
            Some(PushStatus::Conflict { server_project }) => Ok(EditOutcome::Failed(format!(
                "conflict payload carries id {}",
                server_project.id
            ))),
            Some(PushStatus::Failed { reason }) => {
                warn!("Push of {} rejected: {}", id, reason);
                Ok(EditOutcome::Failed(reason))
            }
            None => Ok(EditOutcome::Failed(format!("no push result for {}", id))),
        }
    }

    /// Close a project on the server, or locally when offline
    pub async fn close_project(&self, id: &str) -> Result<EditOutcome> {
        let mut project = self
            .store
            .load_project(id)
            .await?
            .ok_or_else(|| SyncError::ProjectNotFound(id.to_string()))?;

        if self.gateway.is_online().await {
            match self
                .gateway
                .close_project(CloseProjectRequest { id: id.to_string() })
                .await
            {
                Ok(response) if response.project.id == id => {
                    self.store.save_project(&response.project).await?;
                    self.queue.dequeue_push(id).await?;
                    info!("Closed {} on the server", id);
                    return Ok(EditOutcome::Pushed);
                }
                Ok(response) => {
                    return Ok(EditOutcome::Failed(format!(
                        "close of {} answered with {}",
                        id, response.project.id
                    )));
                }
                Err(e) if e.is_offline() => {}
                Err(e) => {
                    warn!("Close of {} failed: {}", id, e);
                    return Ok(EditOutcome::Failed(e.to_string()));
                }
            }
        }

        project.is_closed = true;
        project.touch(Utc::now());
        self.store.save_project(&project).await?;
        self.queue.enqueue_push(id).await?;
        info!("Closed {} locally, push queued", id);
        Ok(EditOutcome::Queued)
    }

    /// Upload a bill image for a project, queueing it when offline
    pub async fn upload_bill(
        &self,
        project_id: &str,
        data: Vec<u8>,
        original_filename: &str,
    ) -> Result<UploadResult> {
        Validator::validate_id(project_id)?;
        Validator::validate_attachment_size(data.len())?;
        if !self.store.has_project(project_id).await? {
            return Err(SyncError::ProjectNotFound(project_id.to_string()));
        }

        if self.gateway.is_online().await {
            match attempt_upload(
                self.gateway.as_ref(),
                &self.store,
                project_id,
                original_filename,
                data.clone(),
            )
            .await?
            {
                UploadAttempt::Uploaded(attachment_id) => {
                    return Ok(UploadResult {
                        success: true,
                        queued: false,
                        attachment_id: Some(attachment_id),
                        temp_id: None,
                        message: "Uploaded".to_string(),
                    });
                }
                UploadAttempt::Rejected(message) => {
                    warn!("Upload for {} rejected: {}", project_id, message);
                    return Ok(UploadResult {
                        success: false,
                        queued: false,
                        attachment_id: None,
                        temp_id: None,
                        message,
                    });
                }
                UploadAttempt::Offline => {}
            }
        }

        let entry = self
            .queue
            .enqueue_upload(project_id, &data, original_filename)
            .await?;
        Ok(UploadResult {
            success: false,
            queued: true,
            attachment_id: None,
            temp_id: Some(entry.temp_id),
            message: "Offline: queued for upload".to_string(),
        })
    }
}
