//! Read models the broadcaster polls.

use std::time::Duration;

use async_trait::async_trait;

use crate::manager::{ProjectStats, RequestMetrics, RuntimeManager};

/// Live statistics of running projects.
pub trait StatsSource: Send + Sync + 'static {
    fn running_projects(&self) -> Vec<String>;

    /// `None` when the project stopped in the meantime.
    fn project_stats(&self, project_id: &str) -> Option<ProjectStats>;
}

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("metrics unavailable for {project}: {reason}")]
    Unavailable { project: String, reason: String },
}

/// Trailing-window request aggregates.
#[async_trait]
pub trait MetricsSource: Send + Sync + 'static {
    async fn aggregate(&self, project_id: &str, window: Duration) -> Result<RequestMetrics, MetricsError>;
}

impl StatsSource for RuntimeManager {
    fn running_projects(&self) -> Vec<String> {
        RuntimeManager::running_projects(self)
    }

    fn project_stats(&self, project_id: &str) -> Option<ProjectStats> {
        self.stats(project_id).ok()
    }
}

#[async_trait]
impl MetricsSource for RuntimeManager {
    async fn aggregate(&self, project_id: &str, window: Duration) -> Result<RequestMetrics, MetricsError> {
        Ok(self.request_log().aggregate(project_id, window))
    }
}
