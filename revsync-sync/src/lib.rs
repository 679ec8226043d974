//! Reconciliation engine for revsync
//!
//! This crate keeps a local store in step with the authoritative server:
//! - Server-computed sync plans executed by [`SyncCoordinator`]
//! - Server-wins conflict resolution
//! - Offline queueing of pushes and bill uploads, with replay
//! - Local retention sweep of old closed projects
//! - Progress and completion events over a broadcast channel
//! - Connectivity-driven auto-sync

pub mod auto_sync;
pub mod conflict;
pub mod coordinator;
pub mod editor;
pub mod errors;
pub mod gateway;
pub mod progress;
pub mod queue;
pub mod replay;
pub mod retention;
pub mod state;

pub use auto_sync::AutoSync;
pub use conflict::{ConflictResolver, Resolution};
pub use coordinator::{CoordinatorConfig, SyncCoordinator};
pub use editor::{EditOutcome, ProjectEditor, UploadResult};
pub use errors::{Result, SyncError};
pub use gateway::{ConnectivityMonitor, GatewayError, GatewayResult, RemoteGateway};
pub use progress::{SyncCounters, SyncEvent, SyncOutcome, SyncPhase, SyncReport};
pub use queue::OfflineQueue;
pub use replay::{ReplayReport, UploadReplayer};
pub use retention::{sweep, RetentionPolicy, SweepReport, DEFAULT_RETENTION_DAYS};
pub use state::CoordinatorState;
