//! Broadcaster
//!
//! Time-driven producer: polls the manager for projects somebody is watching
//! and pushes `monitor` and `metrics` events into the hub, and forwards
//! running-state changes as `status` events the moment they happen.

mod service;
mod sources;

pub use service::{Broadcaster, BroadcasterConfig};
pub use sources::{MetricsError, MetricsSource, StatsSource};

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;
    use serde_json::Value;
    use tokio::sync::{broadcast, mpsc};

    use loom_js_runtime::StatsRecorder;

    use super::service::{metrics_cycle, monitor_cycle};
    use super::*;
    use crate::hub::{Hub, HubConfig, HubHandle};
    use crate::manager::{ProjectStats, RequestLog, RequestMetrics, StatusChange, StatusReason};

    /// Counts every stats read per project.
    struct CountingStats {
        running: Vec<String>,
        reads: Mutex<HashMap<String, usize>>,
    }

    impl CountingStats {
        fn new(running: &[&str]) -> Self {
            Self {
                running: running.iter().map(|p| p.to_string()).collect(),
                reads: Mutex::new(HashMap::new()),
            }
        }

        fn reads(&self, project: &str) -> usize {
            self.reads.lock().get(project).copied().unwrap_or(0)
        }
    }

    impl StatsSource for CountingStats {
        fn running_projects(&self) -> Vec<String> {
            self.running.clone()
        }

        fn project_stats(&self, project_id: &str) -> Option<ProjectStats> {
            *self.reads.lock().entry(project_id.to_string()).or_default() += 1;
            Some(ProjectStats {
                project_id: project_id.to_string(),
                label: "release:1.0.0".to_string(),
                stats: StatsRecorder::new(4).snapshot(Utc::now()),
            })
        }
    }

    /// Fails for one project, aggregates an empty log for the rest.
    struct FlakyMetrics {
        failing: String,
        log: RequestLog,
    }

    #[async_trait]
    impl MetricsSource for FlakyMetrics {
        async fn aggregate(&self, project_id: &str, window: Duration) -> Result<RequestMetrics, MetricsError> {
            if project_id == self.failing {
                return Err(MetricsError::Unavailable {
                    project: project_id.to_string(),
                    reason: "read model offline".to_string(),
                });
            }
            Ok(self.log.aggregate(project_id, window))
        }
    }

    async fn watcher(hub: &HubHandle, projects: &[&str]) -> mpsc::Receiver<Arc<str>> {
        let (tx, mut rx) = mpsc::channel(64);
        let session = hub.register(None, tx).await.unwrap();
        rx.recv().await.unwrap();
        for project in projects {
            hub.subscribe(session, *project).await.unwrap();
        }
        rx
    }

    async fn drain(hub: &HubHandle, rx: &mut mpsc::Receiver<Arc<str>>) -> Vec<Value> {
        hub.client_count().await.unwrap();
        let mut out = Vec::new();
        while let Ok(text) = rx.try_recv() {
            out.push(serde_json::from_str(&text).unwrap());
        }
        out
    }

    #[tokio::test]
    async fn monitor_cycle_skips_unwatched_projects() {
        let (hub, _task) = Hub::spawn(HubConfig::default(), None);
        let stats = CountingStats::new(&["p1", "p2"]);
        let mut rx = watcher(&hub, &["p1", "p3"]).await;

        assert_eq!(monitor_cycle(&hub, &stats).await, 1);
        assert_eq!(monitor_cycle(&hub, &stats).await, 1);

        assert_eq!(stats.reads("p1"), 2);
        assert_eq!(stats.reads("p2"), 0);
        assert_eq!(stats.reads("p3"), 0);

        let frames = drain(&hub, &mut rx).await;
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f["projectId"] == "p1" && f["event"]["type"] == "monitor"));
        assert_eq!(frames[0]["event"]["data"]["totalRequests"], 0);
    }

    #[tokio::test]
    async fn monitor_cycle_without_subscribers_reads_nothing() {
        let (hub, _task) = Hub::spawn(HubConfig::default(), None);
        let stats = CountingStats::new(&["p1"]);

        assert_eq!(monitor_cycle(&hub, &stats).await, 0);
        assert_eq!(stats.reads("p1"), 0);
    }

    #[tokio::test]
    async fn metrics_failures_are_isolated_per_project() {
        let (hub, _task) = Hub::spawn(HubConfig::default(), None);
        let stats = CountingStats::new(&["p1", "p2"]);
        let metrics = FlakyMetrics {
            failing: "p1".to_string(),
            log: RequestLog::new(8),
        };
        let mut rx = watcher(&hub, &["p1", "p2"]).await;

        assert_eq!(metrics_cycle(&hub, &stats, &metrics, Duration::from_secs(60)).await, 1);

        let frames = drain(&hub, &mut rx).await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["projectId"], "p2");
        assert_eq!(frames[0]["event"]["type"], "metrics");
        assert_eq!(frames[0]["event"]["data"]["windowSecs"], 60);
    }

    #[tokio::test]
    async fn status_changes_are_pushed_immediately() {
        let (hub, _task) = Hub::spawn(HubConfig::default(), None);
        let stats = Arc::new(CountingStats::new(&["p1"]));
        let metrics = Arc::new(FlakyMetrics {
            failing: String::new(),
            log: RequestLog::new(8),
        });
        let (status_tx, status_rx) = broadcast::channel(8);
        let mut rx = watcher(&hub, &["p1"]).await;

        // Long intervals: only the status path can produce frames here
        let config = BroadcasterConfig {
            monitor_interval: Duration::from_secs(3600),
            metrics_interval: Duration::from_secs(3600),
            metrics_window: Duration::from_secs(60),
        };
        let broadcaster = Broadcaster::start(config, hub.clone(), stats.clone(), metrics, status_rx);

        // First monitor tick fires right away; let it pass
        tokio::time::sleep(Duration::from_millis(50)).await;
        drain(&hub, &mut rx).await;

        let change = StatusChange {
            project_id: "p1".to_string(),
            running: true,
            reason: StatusReason::Started,
            label: "release:1.0.0".to_string(),
            started_at: Some(Utc::now()),
            at: Utc::now(),
        };
        status_tx.send(change).unwrap();

        let mut frames = Vec::new();
        for _ in 0..50 {
            frames.extend(drain(&hub, &mut rx).await);
            if frames.len() >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(frames[0]["event"]["type"], "status");
        assert_eq!(frames[0]["event"]["data"]["running"], true);
        assert_eq!(frames[1]["event"]["type"], "monitor");

        tokio::time::timeout(Duration::from_secs(1), broadcaster.stop())
            .await
            .expect("broadcaster stops promptly");
    }
}
