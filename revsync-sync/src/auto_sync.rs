//! Connectivity-driven sync trigger

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::coordinator::SyncCoordinator;
use crate::progress::SyncReport;
use crate::replay::UploadReplayer;

/// Background task that replays queued uploads and runs a sync pass each
/// time connectivity comes back.
///
/// The task stops when the handle is dropped or the connectivity channel
/// closes. A pass triggered while another one is running is reported as
/// `Skipped`, not deferred.
pub struct AutoSync {
    coordinator: Arc<SyncCoordinator>,
    replayer: Arc<UploadReplayer>,
    handle: JoinHandle<()>,
}

impl AutoSync {
    pub fn spawn(
        coordinator: Arc<SyncCoordinator>,
        replayer: Arc<UploadReplayer>,
        mut connectivity: watch::Receiver<bool>,
    ) -> Self {
        let task_coordinator = coordinator.clone();
        let task_replayer = replayer.clone();

        // Read before spawning so a change made right after this call is
        // seen as a transition
        let mut online = *connectivity.borrow_and_update();
        let handle = tokio::spawn(async move {
            while connectivity.changed().await.is_ok() {
                let now_online = *connectivity.borrow_and_update();
                let came_online = now_online && !online;
                online = now_online;

                if came_online {
                    info!("Connectivity restored, starting sync");
                    run_cycle(&task_coordinator, &task_replayer).await;
                }
            }
            debug!("Connectivity channel closed, auto-sync stopping");
        });

        Self {
            coordinator,
            replayer,
            handle,
        }
    }

    /// Explicit user refresh: same cycle as a reconnect
    pub async fn trigger(&self) -> SyncReport {
        run_cycle(&self.coordinator, &self.replayer).await
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn shutdown(self) {
        self.handle.abort();
    }
}

impl Drop for AutoSync {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn run_cycle(coordinator: &SyncCoordinator, replayer: &UploadReplayer) -> SyncReport {
    if let Err(e) = replayer.replay_all().await {
        error!("Upload replay failed: {}", e);
    }
    coordinator.run_once().await
}
