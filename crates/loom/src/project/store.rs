//! Project store
//!
//! The host only needs three things from wherever projects live: the code
//! bundle for a running source, a place to record intended status, and the
//! list of projects to bring up at boot. [`FsProjectStore`] keeps them in a
//! directory tree:
//!
//! ```text
//! <root>/<project>/project.toml          requires + [config]
//! <root>/<project>/status.toml           status + source
//! <root>/<project>/releases/<v>/main.js
//! <root>/<project>/branches/<b>/main.js
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;

use loom_js_runtime::CodeBundle;

use super::source::{ProjectStatus, RunningSource, RunningSourceError};

const ENTRY_FILE: &str = "main.js";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("project not found: {0}")]
    ProjectNotFound(String),

    #[error("invalid project id: {0:?}")]
    InvalidId(String),

    #[error("project {0} has no running source")]
    NoSource(String),

    #[error("project {project} has no code for {requested}")]
    SourceNotFound { project: String, requested: RunningSource },

    #[error(transparent)]
    InvalidSource(#[from] RunningSourceError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("failed to write TOML: {0}")]
    TomlWrite(#[from] toml::ser::Error),
}

#[async_trait]
pub trait ProjectStore: Send + Sync + 'static {
    /// Code bundle for `source`; its label is the source text.
    async fn fetch_bundle(&self, project_id: &str, source: &RunningSource) -> Result<CodeBundle, StoreError>;

    async fn record_status(
        &self,
        project_id: &str,
        status: ProjectStatus,
        source: &RunningSource,
    ) -> Result<(), StoreError>;

    /// Projects recorded as running, with the source they ran from.
    async fn autostart(&self) -> Result<Vec<(String, RunningSource)>, StoreError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Files
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct ProjectManifest {
    #[serde(default)]
    requires: Vec<String>,
    #[serde(default)]
    config: Option<Value>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StatusFile {
    status: ProjectStatus,
    #[serde(default)]
    source: RunningSource,
}

// ─────────────────────────────────────────────────────────────────────────────
// Directory-backed store
// ─────────────────────────────────────────────────────────────────────────────

pub struct FsProjectStore {
    root: PathBuf,
}

impl FsProjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn project_dir(&self, project_id: &str) -> Result<PathBuf, StoreError> {
        let valid = !project_id.is_empty()
            && project_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !project_id.starts_with('.');
        if !valid {
            return Err(StoreError::InvalidId(project_id.to_string()));
        }
        Ok(self.root.join(project_id))
    }

    async fn existing_dir(&self, project_id: &str) -> Result<PathBuf, StoreError> {
        let dir = self.project_dir(project_id)?;
        if !fs::try_exists(dir.join("project.toml")).await? {
            return Err(StoreError::ProjectNotFound(project_id.to_string()));
        }
        Ok(dir)
    }

    async fn read_status(dir: &Path) -> Result<Option<StatusFile>, StoreError> {
        let path = dir.join("status.toml");
        if !fs::try_exists(&path).await? {
            return Ok(None);
        }
        let text = fs::read_to_string(&path).await?;
        Ok(Some(toml::from_str(&text)?))
    }
}

#[async_trait]
impl ProjectStore for FsProjectStore {
    async fn fetch_bundle(&self, project_id: &str, source: &RunningSource) -> Result<CodeBundle, StoreError> {
        let dir = self.existing_dir(project_id).await?;

        let code_dir = match source {
            RunningSource::None => return Err(StoreError::NoSource(project_id.to_string())),
            RunningSource::Release(version) => dir.join("releases").join(version),
            RunningSource::Debug(branch) => dir.join("branches").join(branch),
        };
        let entry = code_dir.join(ENTRY_FILE);
        // Source names come from clients; never leave the project directory
        if !entry.starts_with(&dir) || code_dir.components().any(|c| c.as_os_str() == "..") {
            return Err(StoreError::InvalidSource(RunningSourceError(source.to_string())));
        }
        if !fs::try_exists(&entry).await? {
            return Err(StoreError::SourceNotFound {
                project: project_id.to_string(),
                requested: source.clone(),
            });
        }

        let manifest: ProjectManifest = toml::from_str(&fs::read_to_string(dir.join("project.toml")).await?)?;
        let code = fs::read_to_string(&entry).await?;
        tracing::debug!(project = %project_id, %source, bytes = code.len(), "loaded bundle");

        let mut bundle = CodeBundle::new(source.to_string(), code);
        for module in manifest.requires {
            bundle = bundle.require(module);
        }
        if let Some(config) = manifest.config {
            bundle = bundle.with_config(config);
        }
        Ok(bundle)
    }

    async fn record_status(
        &self,
        project_id: &str,
        status: ProjectStatus,
        source: &RunningSource,
    ) -> Result<(), StoreError> {
        let dir = self.existing_dir(project_id).await?;
        let file = StatusFile {
            status,
            source: source.clone(),
        };
        fs::write(dir.join("status.toml"), toml::to_string(&file)?).await?;
        Ok(())
    }

    async fn autostart(&self) -> Result<Vec<(String, RunningSource)>, StoreError> {
        let mut projects = Vec::new();
        if !fs::try_exists(&self.root).await? {
            tracing::debug!(root = %self.root.display(), "project directory missing");
            return Ok(projects);
        }

        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let Some(project_id) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            match Self::read_status(&entry.path()).await {
                Ok(Some(StatusFile {
                    status: ProjectStatus::Running,
                    source,
                })) if !source.is_none() => projects.push((project_id, source)),
                Ok(_) => {}
                Err(e) => tracing::warn!(project = %project_id, error = %e, "unreadable status file"),
            }
        }

        projects.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(projects)
    }
}
