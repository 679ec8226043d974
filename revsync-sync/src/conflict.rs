//! Conflict resolution for pushes the server reports as conflicting
//!
//! The server is the sole authority. A conflicting push makes the client adopt
//! the server's full payload unconditionally: there is no field-level merge
//! and no "keep mine". Concurrent edits from two devices therefore lose one
//! device's edits silently. That trade-off is deliberate and must not be
//! changed here without changing the policy itself.

use tracing::info;

use revsync_proto::Project;
use revsync_store::LocalStore;

use crate::errors::Result;

/// Outcome of resolving one conflict
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Replace the local record with the server's payload verbatim
    AdoptServer(Project),
}

/// Server-wins conflict resolver
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver;

impl ConflictResolver {
    pub fn new() -> Self {
        Self
    }

    pub fn resolve(&self, local: Option<&Project>, server: Project) -> Resolution {
        if let Some(local) = local {
            info!(
                "Conflict on {}: discarding local version {} for server version {}",
                server.id, local.last_modified, server.last_modified
            );
        }
        Resolution::AdoptServer(server)
    }

    /// Resolve and persist: the server payload overwrites the local record
    /// and the pending-push marker is cleared, since the conflict counts as
    /// resolved rather than retried
    pub async fn apply(
        &self,
        store: &LocalStore,
        local: Option<&Project>,
        server: Project,
    ) -> Result<Project> {
        let Resolution::AdoptServer(adopted) = self.resolve(local, server);
        store.save_project(&adopted).await?;
        store.remove_pending_push(&adopted.id).await?;
        Ok(adopted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use revsync_store::{FsyncPolicy, LocalStoreConfig};
    use tempfile::tempdir;

    fn project(title: &str, hour: u32) -> Project {
        Project {
            id: "p-1".to_string(),
            transaction_date: Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap(),
            person: "Nok".to_string(),
            category: "fuel".to_string(),
            document_type: "receipt".to_string(),
            title: title.to_string(),
            notes: None,
            is_closed: false,
            attachment_ids: Vec::new(),
            last_modified: Utc.with_ymd_and_hms(2024, 4, 2, hour, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_server_always_wins() {
        let resolver = ConflictResolver::new();
        // Even a newer local edit loses
        let local = project("mine", 23);
        let server = project("theirs", 1);

        assert_eq!(
            resolver.resolve(Some(&local), server.clone()),
            Resolution::AdoptServer(server)
        );
    }

    #[tokio::test]
    async fn test_apply_overwrites_and_clears_marker() {
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

        let local = project("mine", 10);
        store.save_project(&local).await.unwrap();
        store.add_pending_push("p-1").await.unwrap();

        let server = project("theirs", 9);
        ConflictResolver::new()
            .apply(&store, Some(&local), server.clone())
            .await
            .unwrap();

        assert_eq!(store.load_project("p-1").await.unwrap(), Some(server.clone()));
        assert_eq!(
            store.modification_marker("p-1").await.unwrap(),
            Some(server.last_modified)
        );
        assert!(!store.is_pending_push("p-1").await.unwrap());
    }
}
