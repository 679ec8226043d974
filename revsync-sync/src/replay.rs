//! Replay of bill uploads queued while offline

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use revsync_store::LocalStore;

use crate::editor::{attempt_upload, UploadAttempt};
use crate::errors::Result;
use crate::gateway::RemoteGateway;
use crate::queue::OfflineQueue;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayReport {
    pub attempted: usize,
    pub uploaded: usize,
    pub failed: usize,
    /// Entries whose temp file is gone; they stay queued for inspection
    pub missing_temp: usize,
    /// Entries still queued after this replay
    pub remaining: usize,
    /// Replay stopped early because the server became unreachable
    pub stopped_offline: bool,
    /// Another replay was already in progress
    pub skipped: bool,
}

/// Re-sends queued uploads through the same path as an online upload.
///
/// An entry and its temp file are removed only after the server confirmed
/// the upload; every other outcome leaves both in place.
pub struct UploadReplayer {
    store: Arc<LocalStore>,
    gateway: Arc<dyn RemoteGateway>,
    queue: OfflineQueue,
    running: Mutex<()>,
}

impl UploadReplayer {
    pub fn new(store: Arc<LocalStore>, gateway: Arc<dyn RemoteGateway>) -> Self {
        Self {
            queue: OfflineQueue::new(store.clone()),
            store,
            gateway,
            running: Mutex::new(()),
        }
    }

    pub async fn replay_all(&self) -> Result<ReplayReport> {
        let Ok(_running) = self.running.try_lock() else {
            debug!("Upload replay already in progress");
            return Ok(ReplayReport {
                skipped: true,
                ..Default::default()
            });
        };

        let mut report = ReplayReport::default();
        let entries = self.queue.pending_uploads().await?;
        if entries.is_empty() {
            return Ok(report);
        }

        if !self.gateway.is_online().await {
            report.stopped_offline = true;
            report.remaining = entries.len();
            return Ok(report);
        }

        info!("Replaying {} queued uploads", entries.len());
        for entry in entries {
            let Some(data) = self.queue.read_upload(&entry).await? else {
                warn!(
                    "Temp file {} for queued upload {} is missing",
                    entry.temp_path.display(),
                    entry.temp_id
                );
                report.missing_temp += 1;
                continue;
            };

            report.attempted += 1;
            match attempt_upload(
                self.gateway.as_ref(),
                &self.store,
                &entry.project_id,
                &entry.original_filename,
                data,
            )
            .await?
            {
                UploadAttempt::Uploaded(_) => {
                    self.queue.complete_upload(&entry).await?;
                    report.uploaded += 1;
                }
                UploadAttempt::Offline => {
                    info!("Lost connectivity during replay, stopping");
                    report.stopped_offline = true;
                    break;
                }
                UploadAttempt::Rejected(reason) => {
                    warn!("Queued upload {} rejected: {}", entry.temp_id, reason);
                    report.failed += 1;
                }
            }
        }

        report.remaining = self.queue.pending_uploads().await?.len();
        info!(
            "Replay finished: {} uploaded, {} failed, {} still queued",
            report.uploaded, report.failed, report.remaining
        );
        Ok(report)
    }
}
