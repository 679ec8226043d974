//! LocalStore: durable on-device persistence for project records
//!
//! # Storage Layout
//!
//! ```text
//! {root}/projects/{project_id}.json      record envelope (modified marker + project)
//! {root}/attachments/{attachment_id}.bin raw attachment bytes
//! {root}/attachments/{attachment_id}.json attachment metadata (owner, size, hash)
//! {root}/image_cache/{project_id}.bin    cached rendering of the primary image
//! {root}/uploads/{temp_id}.bin           bytes of uploads waiting for connectivity
//! {root}/meta/*.json                     singleton records
//! ```
//!
//! Every write is atomic (see [`crate::atomic`]). Loads return `Ok(None)` for
//! records that do not exist.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use revsync_proto::validation::validate_project;
use revsync_proto::{Project, ProjectSyncInfo, Validator};

use crate::atomic::{write_atomic, FsyncPolicy};
use crate::errors::Result;

pub(crate) const PROJECTS_DIR: &str = "projects";
pub(crate) const ATTACHMENTS_DIR: &str = "attachments";
pub(crate) const IMAGE_CACHE_DIR: &str = "image_cache";
pub(crate) const UPLOADS_DIR: &str = "uploads";
pub(crate) const META_DIR: &str = "meta";

/// Configuration options for the local store
#[derive(Debug, Clone)]
pub struct LocalStoreConfig {
    /// Fsync policy for every record write
    pub fsync_policy: FsyncPolicy,
    /// Clean up interrupted writes when the store is opened
    pub enable_recovery: bool,
}

impl Default for LocalStoreConfig {
    fn default() -> Self {
        Self {
            fsync_policy: FsyncPolicy::Always,
            enable_recovery: true,
        }
    }
}

/// Persisted form of a project.
///
/// `modified_marker` is the logical version used for metadata diffing. It is
/// always set from `project.last_modified` on save, never from the clock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ProjectRecord {
    pub modified_marker: DateTime<Utc>,
    pub project: Project,
}

/// What a project deletion actually removed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletionReport {
    pub record_removed: bool,
    pub attachments_removed: usize,
    pub cached_image_removed: bool,
}

impl DeletionReport {
    pub fn removed_anything(&self) -> bool {
        self.record_removed || self.attachments_removed > 0 || self.cached_image_removed
    }
}

/// Durable on-device store for projects, attachments and sync metadata
pub struct LocalStore {
    root: PathBuf,
    config: LocalStoreConfig,
    /// Serializes read-modify-write cycles on singleton records
    pub(crate) meta_lock: Mutex<()>,
}

impl LocalStore {
    /// Open (creating if needed) a store rooted at `root`
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(root, LocalStoreConfig::default()).await
    }

    pub async fn open_with_config(root: impl AsRef<Path>, config: LocalStoreConfig) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        for dir in [
            PROJECTS_DIR,
            ATTACHMENTS_DIR,
            IMAGE_CACHE_DIR,
            UPLOADS_DIR,
            META_DIR,
        ] {
            fs::create_dir_all(root.join(dir)).await?;
        }

        let store = Self {
            root,
            config,
            meta_lock: Mutex::new(()),
        };

        if store.config.enable_recovery {
            let stats = store.recover().await?;
            if stats.cleaned > 0 || !stats.orphaned_uploads.is_empty() {
                info!(
                    "Store recovery: cleaned {} interrupted writes, {} uploads missing temp files",
                    stats.cleaned,
                    stats.orphaned_uploads.len()
                );
            }
        }

        debug!("Opened local store at {}", store.root.display());
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &LocalStoreConfig {
        &self.config
    }

    pub(crate) fn dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn project_path(&self, id: &str) -> PathBuf {
        self.dir(PROJECTS_DIR).join(format!("{}.json", id))
    }

    /// Persist a project.
    ///
    /// The record's modification marker is set to the project's logical
    /// `last_modified`, which is what later metadata diffing reads.
    pub async fn save_project(&self, project: &Project) -> Result<()> {
        validate_project(project)?;

        let record = ProjectRecord {
            modified_marker: project.last_modified,
            project: project.clone(),
        };
        self.write_json(&self.project_path(&project.id), &record)
            .await?;

        debug!(
            "Saved project {} (marker {})",
            project.id, project.last_modified
        );
        Ok(())
    }

    pub async fn load_project(&self, id: &str) -> Result<Option<Project>> {
        Ok(self.load_record(id).await?.map(|record| record.project))
    }

    /// The persisted logical version of a project, if it exists
    pub async fn modification_marker(&self, id: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .load_record(id)
            .await?
            .map(|record| record.modified_marker))
    }

    async fn load_record(&self, id: &str) -> Result<Option<ProjectRecord>> {
        Validator::validate_id(id)?;
        self.read_json(&self.project_path(id)).await
    }

    pub async fn has_project(&self, id: &str) -> Result<bool> {
        Validator::validate_id(id)?;
        Ok(fs::try_exists(self.project_path(id)).await?)
    }

    /// Ids of every locally known project, sorted
    pub async fn list_project_ids(&self) -> Result<Vec<String>> {
        let mut ids = self.list_ids(PROJECTS_DIR, "json").await?;
        ids.sort();
        Ok(ids)
    }

    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        let mut projects = Vec::new();
        for id in self.list_project_ids().await? {
            match self.load_project(&id).await {
                Ok(Some(project)) => projects.push(project),
                Ok(None) => {}
                Err(e) => warn!("Skipping unreadable project {}: {}", id, e),
            }
        }
        Ok(projects)
    }

    /// Metadata for every known project, built from persisted markers
    pub async fn project_sync_infos(&self) -> Result<Vec<ProjectSyncInfo>> {
        let mut infos = Vec::new();
        for id in self.list_project_ids().await? {
            if let Some(record) = self.load_record(&id).await? {
                infos.push(ProjectSyncInfo {
                    last_modified: record.modified_marker,
                    ..record.project.sync_info()
                });
            }
        }
        Ok(infos)
    }

    /// Remove a project record, every attachment linked to it, its cached
    /// image and any pending-push marker for it
    pub async fn delete_project(&self, id: &str) -> Result<DeletionReport> {
        Validator::validate_id(id)?;
        let mut report = DeletionReport::default();

        let mut attachment_ids = match self.load_project(id).await? {
            Some(project) => project.attachment_ids,
            None => Vec::new(),
        };
        for owned in self.attachments_owned_by(id).await? {
            if !attachment_ids.contains(&owned) {
                attachment_ids.push(owned);
            }
        }

        for attachment_id in &attachment_ids {
            if self.delete_attachment(attachment_id).await? {
                report.attachments_removed += 1;
            }
        }

        report.cached_image_removed = self.delete_cached_image(id).await?;
        report.record_removed = remove_if_exists(&self.project_path(id)).await?;
        self.remove_pending_push(id).await?;

        debug!(
            "Deleted project {}: record={}, attachments={}, image={}",
            id, report.record_removed, report.attachments_removed, report.cached_image_removed
        );
        Ok(report)
    }

    /// File stems in `dir` carrying `extension`, skipping interrupted writes
    pub(crate) async fn list_ids(&self, dir: &str, extension: &str) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut entries = fs::read_dir(self.dir(dir)).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(extension) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        Ok(ids)
    }

    pub(crate) async fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        write_atomic(path, &bytes, self.config.fsync_policy).await?;
        Ok(())
    }

    pub(crate) async fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        match read_if_exists(path).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

pub(crate) async fn read_if_exists(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub(crate) async fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
