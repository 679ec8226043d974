//! The request/response boundary with the authoritative server
//!
//! Transport is not this crate's concern: anything that can answer these
//! calls (HTTP client, RPC stub, in-process fake) implements [`RemoteGateway`].

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

use revsync_proto::{
    BillPullRequest, BillPullResponse, BillUploadRequest, BillUploadResponse, CloseProjectRequest,
    CloseProjectResponse, NegotiateRequest, PullRequest, PullResponse, PushRequest, PushResponse,
    SyncPlan,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Server unreachable")]
    Offline,

    #[error("Timeout waiting for: {0}")]
    Timeout(String),

    #[error("Rejected by server: {0}")]
    Rejected(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl GatewayError {
    /// Connectivity problems are routed to the offline queue instead of
    /// being reported as failures
    pub fn is_offline(&self) -> bool {
        matches!(self, GatewayError::Offline | GatewayError::Timeout(_))
    }
}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Cheap connectivity check made before any exchange
    async fn is_online(&self) -> bool {
        true
    }

    /// Send local metadata; the server computes the action plan
    async fn negotiate(&self, request: NegotiateRequest) -> GatewayResult<SyncPlan>;

    async fn pull_projects(&self, request: PullRequest) -> GatewayResult<PullResponse>;

    async fn push_projects(&self, request: PushRequest) -> GatewayResult<PushResponse>;

    async fn pull_bill(&self, request: BillPullRequest) -> GatewayResult<BillPullResponse>;

    async fn upload_bill(&self, request: BillUploadRequest) -> GatewayResult<BillUploadResponse>;

    async fn close_project(
        &self,
        request: CloseProjectRequest,
    ) -> GatewayResult<CloseProjectResponse>;
}

/// Connectivity flag shared between the platform's network callbacks, a
/// gateway implementation and [`crate::AutoSync`]
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    tx: Arc<watch::Sender<bool>>,
}

impl ConnectivityMonitor {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Record a connectivity change; listeners only wake on actual changes
    pub fn set_online(&self, online: bool) {
        self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}
