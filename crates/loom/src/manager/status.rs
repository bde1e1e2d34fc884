//! Values the manager publishes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use loom_js_runtime::StatsSnapshot;

/// Why a project's running state changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum StatusReason {
    Started,
    Stopped,
    /// Stopped after the grace period elapsed; the context was abandoned.
    StopTimedOut,
    /// The context thread exited without being asked to.
    Crashed,
}

/// Published on the manager's running-changed channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct StatusChange {
    pub project_id: String,
    pub running: bool,
    pub reason: StatusReason,
    /// Running source of the context that started or stopped.
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    pub at: DateTime<Utc>,
}

impl StatusChange {
    pub(crate) fn started(project_id: &str, label: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            project_id: project_id.to_string(),
            running: true,
            reason: StatusReason::Started,
            label: label.to_string(),
            started_at: Some(started_at),
            at: Utc::now(),
        }
    }

    pub(crate) fn stopped(project_id: &str, label: &str, reason: StatusReason) -> Self {
        Self {
            project_id: project_id.to_string(),
            running: false,
            reason,
            label: label.to_string(),
            started_at: None,
            at: Utc::now(),
        }
    }
}

/// Stats of one running project, as pushed in `monitor` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ProjectStats {
    pub project_id: String,
    pub label: String,
    #[serde(flatten)]
    pub stats: StatsSnapshot,
}
