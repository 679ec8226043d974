//! Error types for sync operations

use thiserror::Error;

use crate::gateway::GatewayError;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Store error: {0}")]
    Store(#[from] revsync_store::StoreError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Validation error: {0}")]
    Validation(#[from] revsync_proto::ValidationError),

    #[error("No connectivity to the server")]
    Offline,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Project not found: {0}")]
    ProjectNotFound(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;
