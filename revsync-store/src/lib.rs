//! Durable on-device storage for revsync
//!
//! [`LocalStore`] keeps one record per project keyed by id, one record per
//! attachment keyed by attachment id, cached primary images and a handful of
//! singleton records (sync status, pending-push set, pending-upload list,
//! person filter cache). The offline queue in `revsync-sync` is layered on the
//! pending-push and pending-upload records kept here.

pub mod atomic;
pub mod attachments;
pub mod errors;
pub mod maintenance;
pub mod singletons;
pub mod store;

pub use atomic::{write_atomic, AtomicWriteResult, AtomicWriter, FsyncPolicy};
pub use attachments::AttachmentMeta;
pub use errors::{Result, StoreError};
pub use maintenance::{RecoveryStats, StorageStats};
pub use store::{DeletionReport, LocalStore, LocalStoreConfig};
