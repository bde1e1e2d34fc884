//! Broadcaster tasks
//!
//! Three loops share one cancellation token: the monitor cycle, the
//! secondary-metric cycle and the status forwarder.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::sources::{MetricsSource, StatsSource};
use crate::hub::{EventKind, HubHandle};
use crate::manager::{StatusChange, StatusReason};

#[derive(Debug, Clone)]
pub struct BroadcasterConfig {
    pub monitor_interval: Duration,
    pub metrics_interval: Duration,
    /// Trailing window the secondary metric aggregates over
    pub metrics_window: Duration,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            monitor_interval: Duration::from_secs(1),
            metrics_interval: Duration::from_secs(30),
            metrics_window: Duration::from_secs(300),
        }
    }
}

pub struct Broadcaster {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Broadcaster {
    /// Spawn the loops. `status` is the manager's running-changed channel.
    pub fn start(
        config: BroadcasterConfig,
        hub: HubHandle,
        stats: Arc<dyn StatsSource>,
        metrics: Arc<dyn MetricsSource>,
        status: broadcast::Receiver<StatusChange>,
    ) -> Self {
        let cancel = CancellationToken::new();

        let tasks = vec![
            tokio::spawn(monitor_loop(
                config.monitor_interval,
                hub.clone(),
                stats.clone(),
                cancel.clone(),
            )),
            tokio::spawn(metrics_loop(
                config.metrics_interval,
                config.metrics_window,
                hub.clone(),
                stats.clone(),
                metrics,
                cancel.clone(),
            )),
            tokio::spawn(status_loop(status, hub, stats, cancel.clone())),
        ];

        tracing::info!(
            monitor = ?config.monitor_interval,
            metrics = ?config.metrics_interval,
            "broadcaster started"
        );
        Self { cancel, tasks }
    }

    /// Cancel every loop and wait for them to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "broadcaster task ended abnormally");
            }
        }
        tracing::info!("broadcaster stopped");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cycles
// ─────────────────────────────────────────────────────────────────────────────

/// Running projects with at least one subscriber.
async fn watched_projects(hub: &HubHandle, stats: &dyn StatsSource) -> Option<Vec<String>> {
    let subscribed: HashSet<String> = match hub.subscribed_projects().await {
        Ok(subscribed) => subscribed,
        Err(e) => {
            tracing::warn!(error = %e, "cannot query subscriptions");
            return None;
        }
    };
    if subscribed.is_empty() {
        return Some(Vec::new());
    }
    Some(
        stats
            .running_projects()
            .into_iter()
            .filter(|project| subscribed.contains(project))
            .collect(),
    )
}

async fn push<T: Serialize>(hub: &HubHandle, project_id: &str, kind: EventKind, data: &T) {
    let data = match serde_json::to_value(data) {
        Ok(data) => data,
        Err(e) => {
            tracing::error!(project = %project_id, ?kind, error = %e, "broadcast encode failed, message skipped");
            return;
        }
    };
    if let Err(e) = hub.broadcast_to_project(project_id, kind, data).await {
        tracing::debug!(project = %project_id, ?kind, error = %e, "push dropped");
    }
}

async fn push_monitor(hub: &HubHandle, stats: &dyn StatsSource, project_id: &str) -> bool {
    match stats.project_stats(project_id) {
        Some(snapshot) => {
            push(hub, project_id, EventKind::Monitor, &snapshot).await;
            true
        }
        None => false,
    }
}

/// One monitor pass; returns the number of `monitor` events pushed.
pub(crate) async fn monitor_cycle(hub: &HubHandle, stats: &dyn StatsSource) -> usize {
    let Some(projects) = watched_projects(hub, stats).await else {
        return 0;
    };
    let mut pushed = 0;
    for project in &projects {
        if push_monitor(hub, stats, project).await {
            pushed += 1;
        }
    }
    pushed
}

/// One secondary-metric pass; a failing project does not stop the others.
pub(crate) async fn metrics_cycle(
    hub: &HubHandle,
    stats: &dyn StatsSource,
    metrics: &dyn MetricsSource,
    window: Duration,
) -> usize {
    let Some(projects) = watched_projects(hub, stats).await else {
        return 0;
    };
    let mut pushed = 0;
    for project in &projects {
        match metrics.aggregate(project, window).await {
            Ok(aggregate) => {
                push(hub, project, EventKind::Metrics, &aggregate).await;
                pushed += 1;
            }
            Err(e) => tracing::warn!(project = %project, error = %e, "metrics aggregation failed"),
        }
    }
    pushed
}

// ─────────────────────────────────────────────────────────────────────────────
// Loops
// ─────────────────────────────────────────────────────────────────────────────

async fn monitor_loop(period: Duration, hub: HubHandle, stats: Arc<dyn StatsSource>, cancel: CancellationToken) {
    let mut tick = tokio::time::interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    pushed = monitor_cycle(&hub, stats.as_ref()) => {
                        tracing::trace!(pushed, "monitor cycle");
                    }
                }
            }
        }
    }
}

async fn metrics_loop(
    period: Duration,
    window: Duration,
    hub: HubHandle,
    stats: Arc<dyn StatsSource>,
    metrics: Arc<dyn MetricsSource>,
    cancel: CancellationToken,
) {
    let start = tokio::time::Instant::now() + period;
    let mut tick = tokio::time::interval_at(start, period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    pushed = metrics_cycle(&hub, stats.as_ref(), metrics.as_ref(), window) => {
                        tracing::trace!(pushed, "metrics cycle");
                    }
                }
            }
        }
    }
}

async fn status_loop(
    mut status: broadcast::Receiver<StatusChange>,
    hub: HubHandle,
    stats: Arc<dyn StatsSource>,
    cancel: CancellationToken,
) {
    loop {
        let change = tokio::select! {
            _ = cancel.cancelled() => break,
            change = status.recv() => change,
        };

        match change {
            Ok(change) => {
                push(&hub, &change.project_id, EventKind::Status, &change).await;
                if change.reason == StatusReason::Started
                    && hub.subscriber_count(&change.project_id).await.unwrap_or(0) > 0
                {
                    push_monitor(&hub, stats.as_ref(), &change.project_id).await;
                }
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "status pushes lagged behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
