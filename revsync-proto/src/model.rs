//! Project records and the metadata that describes them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::encoding::base64_bytes;

/// A review unit: one processed source document plus its classification.
///
/// `last_modified` is the logical version of the record. It is the only value
/// ever compared when deciding whether two copies differ; the time a copy was
/// written to disk plays no part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    /// Date of the underlying transaction; retention is measured against it
    pub transaction_date: DateTime<Utc>,
    pub person: String,
    pub category: String,
    pub document_type: String,
    pub title: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub is_closed: bool,
    #[serde(default)]
    pub attachment_ids: Vec<String>,
    pub last_modified: DateTime<Utc>,
}

impl Project {
    /// Lightweight metadata sent to the server for plan negotiation
    pub fn sync_info(&self) -> ProjectSyncInfo {
        ProjectSyncInfo {
            id: self.id.clone(),
            last_modified: self.last_modified,
            attachment_count: self.attachment_ids.len(),
        }
    }

    /// Advance the logical version to `now`, never moving it backwards
    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_modified {
            self.last_modified = now;
        } else {
            self.last_modified += chrono::Duration::milliseconds(1);
        }
    }

    /// Link an attachment id, ignoring duplicates
    pub fn link_attachment(&mut self, attachment_id: &str) -> bool {
        if self.attachment_ids.iter().any(|id| id == attachment_id) {
            return false;
        }
        self.attachment_ids.push(attachment_id.to_string());
        true
    }
}

/// Per-project metadata used for diffing; never carries the payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSyncInfo {
    pub id: String,
    pub last_modified: DateTime<Utc>,
    pub attachment_count: usize,
}

/// Secondary image ("bill") linked to exactly one project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillAttachment {
    pub id: String,
    pub project_id: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

/// Attachment upload that could not reach the server.
///
/// The bytes live in `temp_path` until the upload is confirmed or the entry is
/// explicitly discarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingBillUpload {
    pub temp_id: String,
    pub project_id: String,
    pub temp_path: PathBuf,
    pub original_filename: String,
    pub queued_at: DateTime<Utc>,
}

/// Singleton record of the last completed full sync
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub last_successful_sync: Option<DateTime<Utc>>,
}
