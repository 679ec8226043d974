//! revsync workspace root
//!
//! Re-exports the member crates so cross-crate integration tests can reach
//! the whole engine through one dependency.

pub use revsync_proto as proto;
pub use revsync_store as store;
pub use revsync_sync as sync;
