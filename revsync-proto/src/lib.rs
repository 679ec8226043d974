//! Data model and wire envelopes shared by the revsync store and sync engine
//!
//! Everything that crosses the boundary to the authoritative server lives
//! here: project records, their lightweight sync metadata, attachment
//! payloads and the request/response pairs exchanged during a sync pass.
#![allow(clippy::must_use_candidate)]
#![allow(clippy::uninlined_format_args)]

pub mod encoding;
pub mod messages;
pub mod model;
pub mod validation;

pub use messages::{
    BillPullRequest, BillPullResponse, BillUploadRequest, BillUploadResponse, CloseProjectRequest,
    CloseProjectResponse, NegotiateRequest, PullRequest, PullResponse, PushItem, PushItemResult,
    PushRequest, PushResponse, PushStatus, SyncPlan,
};
pub use model::{BillAttachment, PendingBillUpload, Project, ProjectSyncInfo, SyncStatus};
pub use validation::{ValidationError, Validator};

// Protocol version for compatibility checking
pub const PROTOCOL_VERSION: &str = "1.2.0";
pub const PROTOCOL_VERSION_MAJOR: u32 = 1;
pub const PROTOCOL_VERSION_MINOR: u32 = 2;
pub const PROTOCOL_VERSION_PATCH: u32 = 0;

/// Version compatibility checking for plan negotiation
pub struct VersionNegotiator;

impl VersionNegotiator {
    /// Returns true if the server speaks the same major version we do
    pub fn is_compatible(server_version: &str) -> bool {
        match Self::parse_version(server_version) {
            Some((major, _minor, _patch)) => major == PROTOCOL_VERSION_MAJOR,
            None => false,
        }
    }

    /// Parse a version string like "1.2.0" into (major, minor, patch)
    fn parse_version(version: &str) -> Option<(u32, u32, u32)> {
        let mut parts = version.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        let patch = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some((major, minor, patch))
    }

    pub fn compatibility_error(server_version: &str) -> String {
        match Self::parse_version(server_version) {
            Some((major, minor, patch)) => format!(
                "Protocol version incompatible: server {}.{}.{}, client {} (major version must match)",
                major, minor, patch, PROTOCOL_VERSION
            ),
            None => format!(
                "Invalid protocol version format '{}', expected format like '{}'",
                server_version, PROTOCOL_VERSION
            ),
        }
    }
}
