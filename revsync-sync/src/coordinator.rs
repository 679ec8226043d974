//! Main sync coordination logic
//!
//! One pass runs the phases strictly in order: collect, negotiate, pull, push,
//! bill pull, delete, persons refresh, retention sweep. Per-item failures are
//! counted and skipped; anything else aborts the remaining phases and turns
//! the pass into a `Failed` report. Nothing escapes [`SyncCoordinator::run_once`].

use chrono::Utc;
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use revsync_proto::validation::validate_plan;
use revsync_proto::{
    BillPullRequest, NegotiateRequest, PullRequest, PushItem, PushRequest, PushStatus, SyncPlan,
    SyncStatus, VersionNegotiator, PROTOCOL_VERSION,
};
use revsync_store::{LocalStore, StoreError};

use crate::conflict::ConflictResolver;
use crate::errors::{Result, SyncError};
use crate::gateway::RemoteGateway;
use crate::progress::{SyncCounters, SyncEvent, SyncOutcome, SyncPhase, SyncReport};
use crate::queue::OfflineQueue;
use crate::retention::{self, RetentionPolicy, DEFAULT_RETENTION_DAYS};
use crate::state::{lock_state, CoordinatorState, RunGuard};

/// Configuration for the sync coordinator
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Identifies this device to the server during negotiation
    pub device_id: String,
    /// Closed projects older than this many days are swept locally
    pub retention_days: u32,
    /// Project ids per pull round trip
    pub pull_batch_size: usize,
    /// Projects per push round trip
    pub push_batch_size: usize,
    /// Buffered events per subscriber before lagging ones lose events
    pub event_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            device_id: "unnamed-device".to_string(),
            retention_days: DEFAULT_RETENTION_DAYS,
            pull_batch_size: 50,
            push_batch_size: 50,
            event_capacity: 64,
        }
    }
}

pub struct SyncCoordinator {
    config: CoordinatorConfig,
    store: Arc<LocalStore>,
    gateway: Arc<dyn RemoteGateway>,
    queue: OfflineQueue,
    resolver: ConflictResolver,
    state: Mutex<CoordinatorState>,
    last_report: Mutex<Option<SyncReport>>,
    events: broadcast::Sender<SyncEvent>,
}

impl SyncCoordinator {
    pub fn new(
        config: CoordinatorConfig,
        store: Arc<LocalStore>,
        gateway: Arc<dyn RemoteGateway>,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            queue: OfflineQueue::new(store.clone()),
            config,
            store,
            gateway,
            resolver: ConflictResolver::new(),
            state: Mutex::new(CoordinatorState::Idle),
            last_report: Mutex::new(None),
            events,
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    pub fn queue(&self) -> &OfflineQueue {
        &self.queue
    }

    pub fn state(&self) -> CoordinatorState {
        lock_state(&self.state).clone()
    }

    /// Report of the most recent pass that actually ran
    pub fn last_report(&self) -> Option<SyncReport> {
        self.last_report
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Run one full synchronization pass.
    ///
    /// Returns a `Skipped` report without touching anything when another
    /// pass is already running.
    pub async fn run_once(&self) -> SyncReport {
        let Some(guard) = RunGuard::acquire(&self.state) else {
            info!("Sync pass already running, skipping trigger");
            let report = SyncReport::skipped();
            self.emit(SyncEvent::Completed {
                report: report.clone(),
            });
            return report;
        };

        let started_at = guard.started_at();
        info!("Starting sync pass");

        let mut counters = SyncCounters::default();
        let result = AssertUnwindSafe(self.execute(&mut counters))
            .catch_unwind()
            .await;

        let outcome = match result {
            Ok(Ok(())) => SyncOutcome::Succeeded,
            Ok(Err(e)) => {
                error!("Sync pass failed: {}", e);
                SyncOutcome::Failed(e.to_string())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!("Sync pass panicked: {}", message);
                SyncOutcome::Failed(message)
            }
        };
        guard.finish(&outcome);

        let report = SyncReport {
            outcome,
            counters,
            started_at,
            finished_at: Utc::now(),
        };

        if report.is_success() {
            info!(
                "Sync pass complete: {} pulled, {} pushed, {} conflicts, {} deleted, {} swept, {} bills, {} failures",
                counters.pulled,
                counters.pushed,
                counters.conflicts,
                counters.deleted,
                counters.swept,
                counters.bills_pulled,
                counters.failures()
            );
        }

        *self
            .last_report
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(report.clone());
        self.emit(SyncEvent::Completed {
            report: report.clone(),
        });
        report
    }

    async fn execute(&self, counters: &mut SyncCounters) -> Result<()> {
        if !self.gateway.is_online().await {
            return Err(SyncError::Offline);
        }

        self.emit(SyncEvent::progress(SyncPhase::Collecting));
        let infos = self.store.project_sync_infos().await?;
        debug!("Collected metadata for {} local projects", infos.len());

        self.emit(SyncEvent::progress(SyncPhase::Negotiating));
        let plan = self.negotiate(infos).await?;

        self.emit(SyncEvent::progress(SyncPhase::Pulling));
        self.pull_projects(&plan.projects_to_pull, counters).await?;

        self.emit(SyncEvent::progress(SyncPhase::Pushing));
        self.push_projects(&plan.projects_to_push, counters).await?;

        self.emit(SyncEvent::progress(SyncPhase::PullingBills));
        self.pull_bills(&plan.bills_to_pull, counters).await?;

        self.emit(SyncEvent::progress(SyncPhase::Deleting));
        for id in &plan.projects_to_delete {
            let report = self.store.delete_project(id).await?;
            if report.removed_anything() {
                debug!("Deleted {} on server instruction", id);
                counters.deleted += 1;
            }
        }

        self.emit(SyncEvent::progress(SyncPhase::RefreshingPersons));
        self.store.save_persons(&plan.available_persons).await?;

        self.emit(SyncEvent::progress(SyncPhase::Sweeping));
        let policy = RetentionPolicy::days(self.config.retention_days);
        let swept = retention::sweep(&self.store, &policy, Utc::now(), false).await?;
        counters.swept = swept.removed.len();

        self.store
            .save_sync_status(&SyncStatus {
                last_successful_sync: Some(Utc::now()),
            })
            .await?;
        self.emit(SyncEvent::progress(SyncPhase::Finished));

        Ok(())
    }

    async fn negotiate(&self, projects: Vec<revsync_proto::ProjectSyncInfo>) -> Result<SyncPlan> {
        let request = NegotiateRequest {
            protocol_version: PROTOCOL_VERSION.to_string(),
            device_id: self.config.device_id.clone(),
            projects,
        };
        let plan = self.gateway.negotiate(request).await?;

        if let Some(server_version) = &plan.server_version {
            if !VersionNegotiator::is_compatible(server_version) {
                return Err(SyncError::Protocol(VersionNegotiator::compatibility_error(
                    server_version,
                )));
            }
        }
        validate_plan(&plan)?;

        if plan.is_empty() {
            info!("Negotiated plan: already in sync");
        } else {
            info!(
                "Negotiated plan: {} to pull, {} to push, {} bills, {} to delete",
                plan.projects_to_pull.len(),
                plan.projects_to_push.len(),
                plan.bills_to_pull.len(),
                plan.projects_to_delete.len()
            );
        }
        Ok(plan)
    }

    async fn pull_projects(&self, ids: &[String], counters: &mut SyncCounters) -> Result<()> {
        for batch in ids.chunks(self.config.pull_batch_size.max(1)) {
            let response = self
                .gateway
                .pull_projects(PullRequest {
                    ids: batch.to_vec(),
                })
                .await?;

            for (id, reason) in &response.failures {
                warn!("Server could not serve {}: {}", id, reason);
                counters.pull_failures += 1;
            }

            let mut served = 0;
            for project in response.projects {
                served += 1;
                let id = project.id.clone();
                match self.store.save_project(&project).await {
                    Ok(()) => {
                        // Local record now equals the server's copy
                        self.queue.dequeue_push(&id).await?;
                        counters.pulled += 1;
                    }
                    Err(StoreError::Validation(e)) => {
                        warn!("Rejected pulled project {}: {}", id, e);
                        counters.pull_failures += 1;
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            let unanswered = batch
                .len()
                .saturating_sub(served + response.failures.len());
            if unanswered > 0 {
                warn!("{} requested projects missing from pull response", unanswered);
                counters.pull_failures += unanswered;
            }
        }
        Ok(())
    }

    async fn push_projects(&self, ids: &[String], counters: &mut SyncCounters) -> Result<()> {
        for batch in ids.chunks(self.config.push_batch_size.max(1)) {
            let mut items = Vec::with_capacity(batch.len());
            for id in batch {
                match self.store.load_project(id).await? {
                    Some(project) => {
                        let local_last_modified = self
                            .store
                            .modification_marker(id)
                            .await?
                            .unwrap_or(project.last_modified);
                        items.push(PushItem {
                            project,
                            local_last_modified,
                        });
                    }
                    None => {
                        warn!("Asked to push {} but it is not stored locally", id);
                        counters.push_failures += 1;
                    }
                }
            }
            if items.is_empty() {
                continue;
            }

            let response = match self
                .gateway
                .push_projects(PushRequest {
                    items: items.clone(),
                })
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    if e.is_offline() {
                        for item in &items {
                            self.queue.enqueue_push(&item.project.id).await?;
                        }
                    }
                    return Err(e.into());
                }
            };

            let mut results: HashMap<String, PushStatus> = response
                .results
                .into_iter()
                .map(|result| (result.id, result.status))
                .collect();

            for item in items {
                let id = item.project.id.clone();
                match results.remove(&id) {
                    Some(PushStatus::Accepted {
                        server_last_modified,
                    }) => {
                        let mut project = item.project;
                        project.last_modified = server_last_modified;
                        self.store.save_project(&project).await?;
                        self.queue.dequeue_push(&id).await?;
                        counters.pushed += 1;
                    }
                    Some(PushStatus::Conflict { server_project }) => {
                        if server_project.id != id {
                            warn!(
                                "Conflict payload for {} carries id {}",
                                id, server_project.id
                            );
                            self.queue.enqueue_push(&id).await?;
                            counters.push_failures += 1;
                            continue;
                        }
                        match self
                            .resolver
                            .apply(&self.store, Some(&item.project), server_project)
                            .await
                        {
                            Ok(_) => counters.conflicts += 1,
                            Err(SyncError::Store(StoreError::Validation(e))) => {
                                warn!("Rejected server payload for {}: {}", id, e);
                                self.queue.enqueue_push(&id).await?;
                                counters.push_failures += 1;
                            }
                            Err(e) => return Err(e),
                        }
                    }
                    Some(PushStatus::Failed { reason }) => {
                        warn!("Push of {} failed: {}", id, reason);
                        self.queue.enqueue_push(&id).await?;
                        counters.push_failures += 1;
                    }
                    None => {
                        warn!("No push result for {}", id);
                        self.queue.enqueue_push(&id).await?;
                        counters.push_failures += 1;
                    }
                }
            }
        }
        Ok(())
    }

    async fn pull_bills(&self, ids: &[String], counters: &mut SyncCounters) -> Result<()> {
        for id in ids {
            if self.store.has_attachment(id).await? {
                continue;
            }

            let response = match self
                .gateway
                .pull_bill(BillPullRequest {
                    attachment_id: id.clone(),
                })
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    warn!("Failed to pull bill {}: {}", id, e);
                    counters.bill_failures += 1;
                    continue;
                }
            };

            if response.attachment.id != *id {
                warn!(
                    "Requested bill {} but server sent {}",
                    id, response.attachment.id
                );
                counters.bill_failures += 1;
                continue;
            }

            match self.store.save_attachment(&response.attachment).await {
                Ok(_) => counters.bills_pulled += 1,
                Err(StoreError::Validation(e)) => {
                    warn!("Rejected bill {}: {}", id, e);
                    counters.bill_failures += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("sync pass panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("sync pass panicked: {}", message)
    } else {
        "sync pass panicked".to_string()
    }
}
