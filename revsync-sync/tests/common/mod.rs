//! In-memory server used by the sync integration tests

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio::sync::Notify;

use revsync_proto::{
    BillAttachment, BillPullRequest, BillPullResponse, BillUploadRequest, BillUploadResponse,
    CloseProjectRequest, CloseProjectResponse, NegotiateRequest, Project, PullRequest,
    PullResponse, PushItemResult, PushRequest, PushResponse, PushStatus, SyncPlan,
    PROTOCOL_VERSION,
};
use revsync_store::{FsyncPolicy, LocalStore, LocalStoreConfig};
use revsync_sync::{ConnectivityMonitor, GatewayError, GatewayResult, RemoteGateway};

pub fn project(id: &str, last_modified: DateTime<Utc>) -> Project {
    Project {
        id: id.to_string(),
        transaction_date: Utc::now() - Duration::days(3),
        person: "Nok".to_string(),
        category: "materials".to_string(),
        document_type: "invoice".to_string(),
        title: format!("Invoice {}", id),
        notes: None,
        is_closed: false,
        attachment_ids: Vec::new(),
        last_modified,
    }
}

pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 7, 1, hour, minute, 0).unwrap()
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

/// Pair of signals used to hold a pass inside negotiation
pub struct NegotiateGate {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

#[derive(Default)]
struct ServerData {
    projects: BTreeMap<String, Project>,
    attachments: HashMap<String, BillAttachment>,
    deleted: BTreeSet<String>,
    persons: Vec<String>,
    /// Edits made by another device while a pass is between negotiate and push
    racing_edits: Vec<Project>,
    clock: Option<DateTime<Utc>>,
}

/// Authoritative server kept in memory.
///
/// Plans are computed by comparing logical versions: newer on the server
/// means pull, newer locally (or unknown to the server) means push. A push
/// whose base version is older than the server copy is a conflict.
pub struct FakeServer {
    pub connectivity: ConnectivityMonitor,
    data: Mutex<ServerData>,
    gate: Mutex<Option<(Arc<Notify>, Arc<Notify>)>>,
    next_attachment: AtomicUsize,
    pub negotiations: AtomicUsize,
    pub pushes: AtomicUsize,
}

impl FakeServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connectivity: ConnectivityMonitor::new(true),
            data: Mutex::new(ServerData {
                persons: vec!["Nok".to_string(), "Somchai".to_string()],
                ..Default::default()
            }),
            gate: Mutex::new(None),
            next_attachment: AtomicUsize::new(1),
            negotiations: AtomicUsize::new(0),
            pushes: AtomicUsize::new(0),
        })
    }

    pub fn set_online(&self, online: bool) {
        self.connectivity.set_online(online);
    }

    pub fn insert(&self, project: Project) {
        let mut data = self.data.lock().unwrap();
        data.projects.insert(project.id.clone(), project);
    }

    pub fn insert_attachment(&self, attachment: BillAttachment) {
        let mut data = self.data.lock().unwrap();
        if let Some(project) = data.projects.get_mut(&attachment.project_id) {
            if !project.attachment_ids.contains(&attachment.id) {
                project.attachment_ids.push(attachment.id.clone());
            }
        }
        data.attachments.insert(attachment.id.clone(), attachment);
    }

    pub fn get(&self, id: &str) -> Option<Project> {
        self.data.lock().unwrap().projects.get(id).cloned()
    }

    pub fn attachment(&self, id: &str) -> Option<BillAttachment> {
        self.data.lock().unwrap().attachments.get(id).cloned()
    }

    /// Retire a project server-side; clients holding it get a delete
    pub fn retire(&self, id: &str) {
        let mut data = self.data.lock().unwrap();
        data.projects.remove(id);
        data.deleted.insert(id.to_string());
    }

    /// Apply `project` as if another device saved it right before the next
    /// push reaches the server
    pub fn edit_before_next_push(&self, project: Project) {
        self.data.lock().unwrap().racing_edits.push(project);
    }

    /// Hold the next negotiation until `release` is notified
    pub fn hold_negotiation(&self) -> NegotiateGate {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some((entered.clone(), release.clone()));
        NegotiateGate { entered, release }
    }

    fn check_online(&self) -> GatewayResult<()> {
        if self.connectivity.is_online() {
            Ok(())
        } else {
            Err(GatewayError::Offline)
        }
    }

    fn tick(data: &mut ServerData) -> DateTime<Utc> {
        let now = Utc::now();
        let next = match data.clock {
            Some(last) if now <= last => last + Duration::milliseconds(1),
            _ => now,
        };
        data.clock = Some(next);
        next
    }
}

#[async_trait]
impl RemoteGateway for FakeServer {
    async fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    async fn negotiate(&self, request: NegotiateRequest) -> GatewayResult<SyncPlan> {
        self.check_online()?;
        self.negotiations.fetch_add(1, Ordering::SeqCst);

        let gate = self.gate.lock().unwrap().take();
        if let Some((entered, release)) = gate {
            entered.notify_one();
            release.notified().await;
        }

        let data = self.data.lock().unwrap();
        let mut plan = SyncPlan {
            available_persons: data.persons.clone(),
            server_version: Some(PROTOCOL_VERSION.to_string()),
            ..Default::default()
        };

        let local: HashMap<_, _> = request
            .projects
            .iter()
            .map(|info| (info.id.clone(), info.last_modified))
            .collect();

        for (id, project) in &data.projects {
            match local.get(id) {
                None => plan.projects_to_pull.push(id.clone()),
                Some(local_version) if project.last_modified > *local_version => {
                    plan.projects_to_pull.push(id.clone())
                }
                Some(local_version) if project.last_modified < *local_version => {
                    plan.projects_to_push.push(id.clone())
                }
                Some(_) => {}
            }
            plan.bills_to_pull.extend(
                project
                    .attachment_ids
                    .iter()
                    .filter(|bill| data.attachments.contains_key(*bill))
                    .cloned(),
            );
        }

        for info in &request.projects {
            if data.projects.contains_key(&info.id) {
                continue;
            }
            if data.deleted.contains(&info.id) {
                plan.projects_to_delete.push(info.id.clone());
            } else {
                plan.projects_to_push.push(info.id.clone());
            }
        }

        Ok(plan)
    }

    async fn pull_projects(&self, request: PullRequest) -> GatewayResult<PullResponse> {
        self.check_online()?;
        let data = self.data.lock().unwrap();
        let mut response = PullResponse::default();
        for id in request.ids {
            match data.projects.get(&id) {
                Some(project) => response.projects.push(project.clone()),
                None => {
                    response.failures.insert(id, "not found".to_string());
                }
            }
        }
        Ok(response)
    }

    async fn push_projects(&self, request: PushRequest) -> GatewayResult<PushResponse> {
        self.check_online()?;
        self.pushes.fetch_add(1, Ordering::SeqCst);
        let mut data = self.data.lock().unwrap();

        for edit in std::mem::take(&mut data.racing_edits) {
            let mut edit = edit;
            edit.last_modified = Self::tick(&mut data);
            data.projects.insert(edit.id.clone(), edit);
        }

        let mut results = Vec::new();
        for item in request.items {
            let id = item.project.id.clone();
            let newer_on_server = data
                .projects
                .get(&id)
                .filter(|server| server.last_modified > item.local_last_modified)
                .cloned();
            let status = match newer_on_server {
                Some(server_project) => PushStatus::Conflict { server_project },
                None => {
                    let stamp = Self::tick(&mut data);
                    let mut project = item.project;
                    project.last_modified = stamp;
                    data.projects.insert(id.clone(), project);
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
        self.check_online()?;
        let data = self.data.lock().unwrap();
        data.attachments
            .get(&request.attachment_id)
            .cloned()
            .map(|attachment| BillPullResponse { attachment })
            .ok_or_else(|| GatewayError::Rejected(format!("no bill {}", request.attachment_id)))
    }

    async fn upload_bill(&self, request: BillUploadRequest) -> GatewayResult<BillUploadResponse> {
        self.check_online()?;
        let attachment_id = format!(
            "bill-{}",
            self.next_attachment.fetch_add(1, Ordering::SeqCst)
        );

        let mut data = self.data.lock().unwrap();
        let stamp = Self::tick(&mut data);
        let Some(project) = data.projects.get_mut(&request.project_id) else {
            return Err(GatewayError::Rejected(format!(
                "unknown project {}",
                request.project_id
            )));
        };
        project.attachment_ids.push(attachment_id.clone());
        project.last_modified = stamp;
        let project = project.clone();

        data.attachments.insert(
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
        self.check_online()?;
        let mut data = self.data.lock().unwrap();
        let stamp = Self::tick(&mut data);
        let project = data
            .projects
            .get_mut(&request.id)
            .ok_or_else(|| GatewayError::Rejected(format!("unknown project {}", request.id)))?;
        project.is_closed = true;
        project.last_modified = stamp;
        Ok(CloseProjectResponse {
            project: project.clone(),
        })
    }
}
