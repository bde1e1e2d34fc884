//! Start/stop glue between the project store and the runtime manager.
//!
//! Keeps the store's recorded status in line with what the manager actually
//! did: a start that fails leaves the project recorded as stopped. Start and
//! stop of one project are serialized here so the recorded status is written
//! in the same order the manager applied them.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::manager::{ManagerError, RuntimeManager};

use super::source::{ProjectStatus, RunningSource};
use super::store::{ProjectStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Manager(#[from] ManagerError),
}

#[derive(Clone)]
pub struct ProjectController {
    manager: RuntimeManager,
    store: Arc<dyn ProjectStore>,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl ProjectController {
    pub fn new(manager: RuntimeManager, store: Arc<dyn ProjectStore>) -> Self {
        Self {
            manager,
            store,
            locks: Arc::new(DashMap::new()),
        }
    }

    pub fn manager(&self) -> &RuntimeManager {
        &self.manager
    }

    fn project_lock(&self, project_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(project_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn record(&self, project_id: &str, status: ProjectStatus, source: &RunningSource) {
        if let Err(e) = self.store.record_status(project_id, status, source).await {
            tracing::warn!(project = %project_id, ?status, error = %e, "failed to record project status");
        }
    }

    pub async fn start(&self, project_id: &str, source: &RunningSource) -> Result<(), ControllerError> {
        let lock = self.project_lock(project_id);
        let _guard = lock.lock().await;

        let result = match self.store.fetch_bundle(project_id, source).await {
            Ok(bundle) => self.manager.start(project_id, bundle).await.map_err(ControllerError::from),
            Err(e) => Err(e.into()),
        };

        match &result {
            Ok(()) => self.record(project_id, ProjectStatus::Running, source).await,
            // Someone else's start won; their status stands
            Err(ControllerError::Manager(ManagerError::AlreadyRunning(_))) => {}
            Err(e) => {
                tracing::warn!(project = %project_id, %source, error = %e, "start failed");
                self.record(project_id, ProjectStatus::Stopped, &RunningSource::None).await;
            }
        }
        result
    }

    /// Stop the project. It is recorded as stopped even when the shutdown
    /// hooks timed out, since the context is gone either way.
    pub async fn stop(&self, project_id: &str) -> Result<(), ControllerError> {
        let lock = self.project_lock(project_id);
        let _guard = lock.lock().await;

        let result = self.manager.stop(project_id).await;
        if !matches!(result, Err(ManagerError::NotRunning(_))) {
            self.record(project_id, ProjectStatus::Stopped, &RunningSource::None).await;
        }
        result.map_err(ControllerError::from)
    }

    /// Start every project recorded as running. Returns how many came up.
    pub async fn autostart(&self) -> Result<usize, ControllerError> {
        let projects = self.store.autostart().await?;
        let mut started = 0;
        for (project_id, source) in &projects {
            match self.start(project_id, source).await {
                Ok(()) => started += 1,
                Err(e) => tracing::error!(project = %project_id, %source, error = %e, "autostart failed"),
            }
        }
        tracing::info!(started, total = projects.len(), "autostart complete");
        Ok(started)
    }
}
