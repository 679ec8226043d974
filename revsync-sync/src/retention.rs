//! Local retention sweep
//!
//! Closed projects whose transaction date is older than the retention window
//! are deleted locally even when the server did not ask for it. The server
//! runs its own retention on the same rule; both checks are kept on purpose
//! and run independently of each other.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use revsync_proto::Project;
use revsync_store::LocalStore;

use crate::errors::Result;

pub const DEFAULT_RETENTION_DAYS: u32 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub window: Duration,
}

impl RetentionPolicy {
    pub fn days(days: u32) -> Self {
        Self {
            window: Duration::days(i64::from(days)),
        }
    }

    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.window
    }

    /// Open projects are never expired, however old
    pub fn is_expired(&self, project: &Project, now: DateTime<Utc>) -> bool {
        project.is_closed && project.transaction_date < self.cutoff(now)
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::days(DEFAULT_RETENTION_DAYS)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub examined: usize,
    /// Ids removed, or that would be removed on a dry run
    pub removed: Vec<String>,
}

/// Delete every expired project with its attachments and cached image.
///
/// Projects still marked for push are kept until the server confirms them.
pub async fn sweep(
    store: &LocalStore,
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
    dry_run: bool,
) -> Result<SweepReport> {
    let mut report = SweepReport::default();
    let pending: HashSet<String> = store.pending_pushes().await?.into_iter().collect();

    for project in store.list_projects().await? {
        report.examined += 1;
        if !policy.is_expired(&project, now) {
            continue;
        }
        if pending.contains(&project.id) {
            debug!("Keeping expired {} until its local changes are pushed", project.id);
            continue;
        }

        if dry_run {
            debug!("Would sweep {} (dated {})", project.id, project.transaction_date);
        } else {
            store.delete_project(&project.id).await?;
            debug!("Swept {} (dated {})", project.id, project.transaction_date);
        }
        report.removed.push(project.id);
    }

    if !report.removed.is_empty() {
        info!(
            "Retention sweep {} {} of {} projects older than {}",
            if dry_run { "selected" } else { "removed" },
            report.removed.len(),
            report.examined,
            policy.cutoff(now).date_naive()
        );
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use revsync_proto::BillAttachment;
    use revsync_store::{FsyncPolicy, LocalStoreConfig};
    use tempfile::tempdir;

    fn project(id: &str, closed: bool, date: DateTime<Utc>) -> Project {
        Project {
            id: id.to_string(),
            transaction_date: date,
            person: "Nok".to_string(),
            category: "travel".to_string(),
            document_type: "receipt".to_string(),
            title: id.to_string(),
            notes: None,
            is_closed: closed,
            attachment_ids: Vec::new(),
            last_modified: date,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_only_closed_and_old_expire() {
        let policy = RetentionPolicy::default();
        let old = now() - Duration::days(120);
        let recent = now() - Duration::days(10);

        assert!(policy.is_expired(&project("a", true, old), now()));
        assert!(!policy.is_expired(&project("b", false, old), now()));
        assert!(!policy.is_expired(&project("c", true, recent), now()));
    }

    #[tokio::test]
    async fn test_sweep_removes_attachments_too() {
        let dir = tempdir().unwrap();
        let store = LocalStore::open_with_config(
            dir.path(),
            LocalStoreConfig {
                fsync_policy: FsyncPolicy::Never,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let mut closed = project("closed", true, now() - Duration::days(120));
        closed.attachment_ids.push("b-1".to_string());
        store.save_project(&closed).await.unwrap();
        store
            .save_attachment(&BillAttachment {
                id: "b-1".to_string(),
                project_id: "closed".to_string(),
                data: b"jpeg".to_vec(),
            })
            .await
            .unwrap();
        store
            .save_project(&project("open", false, now() - Duration::days(120)))
            .await
            .unwrap();

        let dry = sweep(&store, &RetentionPolicy::default(), now(), true)
            .await
            .unwrap();
        assert_eq!(dry.removed, vec!["closed"]);
        assert!(store.has_project("closed").await.unwrap());

        let report = sweep(&store, &RetentionPolicy::default(), now(), false)
            .await
            .unwrap();
        assert_eq!(report.examined, 2);
        assert_eq!(report.removed, vec!["closed"]);
        assert!(store.load_project("closed").await.unwrap().is_none());
        assert!(store.load_attachment("b-1").await.unwrap().is_none());
        assert!(store.has_project("open").await.unwrap());
    }

    #[tokio::test]
    async fn test_sweep_keeps_unpushed_projects() {
        let dir = tempdir().unwrap();
        let store = LocalStore::open_with_config(
            dir.path(),
            LocalStoreConfig {
                fsync_policy: FsyncPolicy::Never,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let old = now() - Duration::days(122);
        store.save_project(&project("pushed", true, old)).await.unwrap();
        store.save_project(&project("unpushed", true, old)).await.unwrap();
        store.add_pending_push("unpushed").await.unwrap();

        let report = sweep(&store, &RetentionPolicy::default(), now(), false)
            .await
            .unwrap();
        assert_eq!(report.removed, vec!["pushed"]);
        assert!(store.has_project("unpushed").await.unwrap());
        assert!(store.is_pending_push("unpushed").await.unwrap());
    }
}
