//! Request/response pairs exchanged with the authoritative server
//!
//! Every exchange is keyed by project id(s) and logical last-modified stamps.
//! The server, not the client, decides sync direction: the client sends its
//! metadata and is handed back a [`SyncPlan`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::encoding::base64_bytes;
use crate::model::{BillAttachment, Project, ProjectSyncInfo};

/// Metadata negotiation: local state in, action plan out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NegotiateRequest {
    pub protocol_version: String,
    pub device_id: String,
    pub projects: Vec<ProjectSyncInfo>,
}

/// Server-computed action plan for one sync pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPlan {
    #[serde(default)]
    pub projects_to_pull: Vec<String>,
    #[serde(default)]
    pub projects_to_push: Vec<String>,
    #[serde(default)]
    pub bills_to_pull: Vec<String>,
    #[serde(default)]
    pub projects_to_delete: Vec<String>,
    #[serde(default)]
    pub available_persons: Vec<String>,
    /// Protocol version the server answered with, when it reports one
    #[serde(default)]
    pub server_version: Option<String>,
}

impl SyncPlan {
    /// True when the plan asks for no data movement at all
    pub fn is_empty(&self) -> bool {
        self.projects_to_pull.is_empty()
            && self.projects_to_push.is_empty()
            && self.bills_to_pull.is_empty()
            && self.projects_to_delete.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequest {
    pub ids: Vec<String>,
}

/// Batch pull result; ids the server could not serve land in `failures`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PullResponse {
    pub projects: Vec<Project>,
    #[serde(default)]
    pub failures: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushItem {
    pub project: Project,
    /// The client's persisted logical version of the record
    pub local_last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushRequest {
    pub items: Vec<PushItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PushStatus {
    /// Stored by the server, which assigned `server_last_modified`
    Accepted { server_last_modified: DateTime<Utc> },
    /// The server holds a different version; its copy is returned verbatim
    Conflict { server_project: Project },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushItemResult {
    pub id: String,
    #[serde(flatten)]
    pub status: PushStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushResponse {
    pub results: Vec<PushItemResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillPullRequest {
    pub attachment_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillPullResponse {
    pub attachment: BillAttachment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillUploadRequest {
    pub project_id: String,
    pub original_filename: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

/// Upload confirmation: the server-assigned attachment id and the project as
/// it stands after linking the attachment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillUploadResponse {
    pub attachment_id: String,
    pub project: Project,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseProjectRequest {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseProjectResponse {
    pub project: Project,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_push_status_wire_shape() {
        let result = PushItemResult {
            id: "p-1".to_string(),
            status: PushStatus::Failed {
                reason: "locked".to_string(),
            },
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["id"], "p-1");
        assert_eq!(json["status"], "failed");
        assert_eq!(json["reason"], "locked");

        let accepted: PushItemResult = serde_json::from_str(
            r#"{"id":"p-2","status":"accepted","server_last_modified":"2024-05-01T10:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(
            accepted.status,
            PushStatus::Accepted {
                server_last_modified: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
            }
        );
    }

    #[test]
    fn test_plan_fields_default_when_absent() {
        let plan: SyncPlan = serde_json::from_str(r#"{"projects_to_pull":["a"]}"#).unwrap();
        assert_eq!(plan.projects_to_pull, vec!["a"]);
        assert!(plan.available_persons.is_empty());
        assert!(!plan.is_empty());
        assert!(SyncPlan::default().is_empty());
    }

    #[test]
    fn test_upload_request_carries_base64() {
        let request = BillUploadRequest {
            project_id: "p-1".to_string(),
            original_filename: "bill.jpg".to_string(),
            data: b"abc".to_vec(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["data"], "YWJj");
    }
}
