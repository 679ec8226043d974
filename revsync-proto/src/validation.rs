//! Input validation and size limits for records received from the server
#![allow(clippy::missing_errors_doc)]

use thiserror::Error;

use crate::messages::SyncPlan;
use crate::model::{BillAttachment, Project};

/// Size limits applied to incoming records
pub mod limits {
    /// Maximum length of a project or attachment id
    pub const MAX_ID_LENGTH: usize = 128;

    /// Maximum size of a single attachment (25 MB)
    pub const MAX_ATTACHMENT_SIZE: usize = 25 * 1024 * 1024;

    /// Maximum attachments linked to one project
    pub const MAX_ATTACHMENTS_PER_PROJECT: usize = 256;

    /// Maximum length of free-text fields
    pub const MAX_TEXT_LENGTH: usize = 4096;

    /// Maximum ids in any one list of a plan
    pub const MAX_PLAN_ENTRIES: usize = 100_000;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid id '{id}': {reason}")]
    InvalidId { id: String, reason: String },

    #[error("Attachment size {size} exceeds maximum {max}")]
    AttachmentTooLarge { size: usize, max: usize },

    #[error("Project has {count} attachments, exceeds maximum {max}")]
    TooManyAttachments { count: usize, max: usize },

    #[error("Field {field} length {length} exceeds maximum {max}")]
    TextTooLong {
        field: String,
        length: usize,
        max: usize,
    },

    #[error("Plan list {list} has {count} entries, exceeds maximum {max}")]
    PlanTooLarge {
        list: String,
        count: usize,
        max: usize,
    },
}

pub struct Validator;

impl Validator {
    /// Ids become file names in the local store, so they must be path-safe
    pub fn validate_id(id: &str) -> Result<(), ValidationError> {
        if id.is_empty() {
            return Err(ValidationError::MissingField {
                field: "id".to_string(),
            });
        }

        if id.len() > limits::MAX_ID_LENGTH {
            return Err(ValidationError::InvalidId {
                id: id.to_string(),
                reason: format!("length {} exceeds {}", id.len(), limits::MAX_ID_LENGTH),
            });
        }

        if id.starts_with('.') {
            return Err(ValidationError::InvalidId {
                id: id.to_string(),
                reason: "must not start with '.'".to_string(),
            });
        }

        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return Err(ValidationError::InvalidId {
                id: id.to_string(),
                reason: "contains invalid characters".to_string(),
            });
        }

        Ok(())
    }

    fn validate_text(field: &str, value: &str) -> Result<(), ValidationError> {
        if value.len() > limits::MAX_TEXT_LENGTH {
            return Err(ValidationError::TextTooLong {
                field: field.to_string(),
                length: value.len(),
                max: limits::MAX_TEXT_LENGTH,
            });
        }
        Ok(())
    }

    pub fn validate_attachment_size(size: usize) -> Result<(), ValidationError> {
        if size > limits::MAX_ATTACHMENT_SIZE {
            return Err(ValidationError::AttachmentTooLarge {
                size,
                max: limits::MAX_ATTACHMENT_SIZE,
            });
        }
        Ok(())
    }
}

/// Validate a project before it is persisted
pub fn validate_project(project: &Project) -> Result<(), ValidationError> {
    Validator::validate_id(&project.id)?;
    Validator::validate_text("person", &project.person)?;
    Validator::validate_text("category", &project.category)?;
    Validator::validate_text("document_type", &project.document_type)?;
    Validator::validate_text("title", &project.title)?;
    if let Some(notes) = &project.notes {
        Validator::validate_text("notes", notes)?;
    }

    if project.attachment_ids.len() > limits::MAX_ATTACHMENTS_PER_PROJECT {
        return Err(ValidationError::TooManyAttachments {
            count: project.attachment_ids.len(),
            max: limits::MAX_ATTACHMENTS_PER_PROJECT,
        });
    }
    for attachment_id in &project.attachment_ids {
        Validator::validate_id(attachment_id)?;
    }

    Ok(())
}

/// Validate an attachment before its bytes are persisted
pub fn validate_attachment(attachment: &BillAttachment) -> Result<(), ValidationError> {
    Validator::validate_id(&attachment.id)?;
    Validator::validate_id(&attachment.project_id)?;
    Validator::validate_attachment_size(attachment.data.len())
}

/// Validate the shape of a negotiated plan
pub fn validate_plan(plan: &SyncPlan) -> Result<(), ValidationError> {
    let lists = [
        ("projects_to_pull", &plan.projects_to_pull),
        ("projects_to_push", &plan.projects_to_push),
        ("bills_to_pull", &plan.bills_to_pull),
        ("projects_to_delete", &plan.projects_to_delete),
    ];

    for (name, ids) in lists {
        if ids.len() > limits::MAX_PLAN_ENTRIES {
            return Err(ValidationError::PlanTooLarge {
                list: name.to_string(),
                count: ids.len(),
                max: limits::MAX_PLAN_ENTRIES,
            });
        }
        for id in ids {
            Validator::validate_id(id)?;
        }
    }

    Ok(())
}
