//! Shared helpers for the cross-crate tests: an in-memory server several
//! devices can sync against, and device setup on temp directories

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tempfile::TempDir;

use revsync::proto::{
    BillAttachment, BillPullRequest, BillPullResponse, BillUploadRequest, BillUploadResponse,
    CloseProjectRequest, CloseProjectResponse, NegotiateRequest, Project, PullRequest,
    PullResponse, PushItemResult, PushRequest, PushResponse, PushStatus, SyncPlan,
};
use revsync::store::{FsyncPolicy, LocalStore, LocalStoreConfig};
use revsync::sync::{
    ConnectivityMonitor, CoordinatorConfig, GatewayError, GatewayResult, ProjectEditor,
    RemoteGateway, SyncCoordinator, UploadReplayer,
};

#[derive(Default)]
struct Records {
    projects: BTreeMap<String, Project>,
    attachments: BTreeMap<String, BillAttachment>,
    clock: Option<DateTime<Utc>>,
}

impl Records {
    fn tick(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let next = match self.clock {
            Some(last) if now <= last => last + Duration::milliseconds(1),
            _ => now,
        };
        self.clock = Some(next);
        next
    }
}

/// Server shared by every device in a test; each device gets its own
/// connectivity switch through [`DeviceLink`]
#[derive(Default)]
pub struct SharedServer {
    records: Mutex<Records>,
}

impl SharedServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed(&self, project: Project) {
        let mut records = self.records.lock().unwrap();
        records.projects.insert(project.id.clone(), project);
    }

    pub fn get(&self, id: &str) -> Option<Project> {
        self.records.lock().unwrap().projects.get(id).cloned()
    }

    pub fn attachment_count(&self) -> usize {
        self.records.lock().unwrap().attachments.len()
    }
}

/// One device's view of the shared server
pub struct DeviceLink {
    server: Arc<SharedServer>,
    pub connectivity: ConnectivityMonitor,
}

impl DeviceLink {
    pub fn new(server: Arc<SharedServer>) -> Arc<Self> {
        Arc::new(Self {
            server,
            connectivity: ConnectivityMonitor::new(true),
        })
    }

    fn records(&self) -> GatewayResult<std::sync::MutexGuard<'_, Records>> {
        if !self.connectivity.is_online() {
            return Err(GatewayError::Offline);
        }
        Ok(self.server.records.lock().unwrap())
    }
}

#[async_trait]
impl RemoteGateway for DeviceLink {
    async fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    async fn negotiate(&self, request: NegotiateRequest) -> GatewayResult<SyncPlan> {
        let records = self.records()?;
        let mut plan = SyncPlan::default();
        for info in &request.projects {
            match records.projects.get(&info.id) {
                Some(server) if server.last_modified > info.last_modified => {
                    plan.projects_to_pull.push(info.id.clone())
                }
                Some(server) if server.last_modified == info.last_modified => {}
                _ => plan.projects_to_push.push(info.id.clone()),
            }
        }
        for (id, project) in &records.projects {
            if !request.projects.iter().any(|info| &info.id == id) {
                plan.projects_to_pull.push(id.clone());
            }
            plan.bills_to_pull.extend(project.attachment_ids.iter().cloned());
        }
        Ok(plan)
    }

    async fn pull_projects(&self, request: PullRequest) -> GatewayResult<PullResponse> {
        let records = self.records()?;
        let mut response = PullResponse::default();
        for id in request.ids {
            match records.projects.get(&id) {
                Some(project) => response.projects.push(project.clone()),
                None => {
                    response.failures.insert(id, "not found".to_string());
                }
            }
        }
        Ok(response)
    }

    async fn push_projects(&self, request: PushRequest) -> GatewayResult<PushResponse> {
        let mut records = self.records()?;
        let mut results = Vec::new();
        for item in request.items {
            let id = item.project.id.clone();
            let newer = records
                .projects
                .get(&id)
                .filter(|server| server.last_modified > item.local_last_modified)
                .cloned();
            let status = match newer {
                Some(server_project) => PushStatus::Conflict { server_project },
                None => {
                    let stamp = records.tick();
                    let mut project = item.project;
                    project.last_modified = stamp;
                    records.projects.insert(id.clone(), project);
                    PushStatus::Accepted {
                        server_last_modified: stamp,
                    }
                }
            };
            results.push(PushItemResult { id, status });
        }
        Ok(PushResponse { results })
    }

    async fn pull_bill(&self, request: BillPullRequest) -> GatewayResult<BillPullResponse> {
        let records = self.records()?;
        records
            .attachments
            .get(&request.attachment_id)
            .cloned()
            .map(|attachment| BillPullResponse { attachment })
            .ok_or_else(|| GatewayError::Rejected("no such bill".to_string()))
    }

    async fn upload_bill(&self, request: BillUploadRequest) -> GatewayResult<BillUploadResponse> {
        let mut records = self.records()?;
        let attachment_id = format!("bill-{}", records.attachments.len() + 1);
        let stamp = records.tick();
        let project = records
            .projects
            .get_mut(&request.project_id)
            .ok_or_else(|| GatewayError::Rejected("unknown project".to_string()))?;
        project.attachment_ids.push(attachment_id.clone());
        project.last_modified = stamp;
        let project = project.clone();
        records.attachments.insert(
            attachment_id.clone(),
            BillAttachment {
                id: attachment_id.clone(),
                project_id: request.project_id,
                data: request.data,
            },
        );
        Ok(BillUploadResponse {
            attachment_id,
            project,
        })
    }

    async fn close_project(
        &self,
        request: CloseProjectRequest,
    ) -> GatewayResult<CloseProjectResponse> {
        let mut records = self.records()?;
        let stamp = records.tick();
        let project = records
            .projects
            .get_mut(&request.id)
            .ok_or_else(|| GatewayError::Rejected("unknown project".to_string()))?;
        project.is_closed = true;
        project.last_modified = stamp;
        Ok(CloseProjectResponse {
            project: project.clone(),
        })
    }
}

/// A field device: its own store directory, link and engine components
pub struct Device {
    pub dir: TempDir,
    pub link: Arc<DeviceLink>,
    pub store: Arc<LocalStore>,
    pub coordinator: SyncCoordinator,
    pub editor: ProjectEditor,
    pub replayer: UploadReplayer,
}

impl Device {
    pub async fn new(name: &str, server: &Arc<SharedServer>) -> Self {
        let dir = TempDir::new().unwrap();
        let link = DeviceLink::new(server.clone());
        Self::assemble(name, dir, link).await
    }

    /// Simulate an app restart: everything in memory is rebuilt from disk
    pub async fn restart(self, name: &str) -> Self {
        let Device { dir, link, .. } = self;
        Self::assemble(name, dir, link).await
    }

    async fn assemble(name: &str, dir: TempDir, link: Arc<DeviceLink>) -> Self {
        let store = open_store(dir.path()).await;
        let coordinator = SyncCoordinator::new(
            CoordinatorConfig {
                device_id: name.to_string(),
                ..Default::default()
            },
            store.clone(),
            link.clone(),
        );
        let editor = ProjectEditor::new(store.clone(), link.clone());
        let replayer = UploadReplayer::new(store.clone(), link.clone());
        Self {
            dir,
            link,
            store,
            coordinator,
            editor,
            replayer,
        }
    }

    pub fn set_online(&self, online: bool) {
        self.link.connectivity.set_online(online);
    }
}

pub async fn open_store(dir: &Path) -> Arc<LocalStore> {
    Arc::new(
        LocalStore::open_with_config(
            dir,
            LocalStoreConfig {
                fsync_policy: FsyncPolicy::Never,
                enable_recovery: true,
            },
        )
        .await
        .unwrap(),
    )
}

pub fn project(id: &str, title: &str) -> Project {
    Project {
        id: id.to_string(),
        transaction_date: Utc::now() - Duration::days(1),
        person: "Somchai".to_string(),
        category: "equipment".to_string(),
        document_type: "invoice".to_string(),
        title: title.to_string(),
        notes: None,
        is_closed: false,
        attachment_ids: Vec::new(),
        last_modified: Utc::now() - Duration::hours(1),
    }
}
