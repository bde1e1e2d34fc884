//! In-process log of recent route invocations.
//!
//! Read model behind the broadcaster's secondary metric: each project keeps
//! its last `capacity` invocations; aggregates are computed over a trailing
//! window on demand.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Trailing-window request aggregate, as pushed in `metrics` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct RequestMetrics {
    pub project_id: String,
    pub window_secs: u64,
    pub requests: u64,
    pub failures: u64,
    pub error_rate: f64,
    pub avg_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub requests_per_minute: f64,
}

#[derive(Debug, Clone, Copy)]
struct RequestRecord {
    at: Instant,
    latency: Duration,
    ok: bool,
}

pub struct RequestLog {
    entries: DashMap<String, VecDeque<RequestRecord>>,
    capacity: usize,
}

impl RequestLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&self, project_id: &str, latency: Duration, ok: bool) {
        let mut entries = self.entries.entry(project_id.to_string()).or_default();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(RequestRecord {
            at: Instant::now(),
            latency,
            ok,
        });
    }

    pub fn aggregate(&self, project_id: &str, window: Duration) -> RequestMetrics {
        let now = Instant::now();
        let mut latencies: Vec<Duration> = Vec::new();
        let mut failures = 0u64;

        if let Some(entries) = self.entries.get(project_id) {
            for record in entries.iter().rev() {
                if now.duration_since(record.at) > window {
                    break;
                }
                if !record.ok {
                    failures += 1;
                }
                latencies.push(record.latency);
            }
        }

        let requests = latencies.len() as u64;
        let (avg, p95) = if latencies.is_empty() {
            (0.0, 0.0)
        } else {
            latencies.sort();
            let total: Duration = latencies.iter().sum();
            let avg = total.as_secs_f64() * 1000.0 / latencies.len() as f64;
            let idx = ((latencies.len() as f64 * 0.95).ceil() as usize).clamp(1, latencies.len()) - 1;
            (avg, latencies[idx].as_secs_f64() * 1000.0)
        };
        let minutes = window.as_secs_f64() / 60.0;

        RequestMetrics {
            project_id: project_id.to_string(),
            window_secs: window.as_secs(),
            requests,
            failures,
            error_rate: if requests == 0 {
                0.0
            } else {
                failures as f64 / requests as f64
            },
            avg_latency_ms: avg,
            p95_latency_ms: p95,
            requests_per_minute: if minutes > 0.0 { requests as f64 / minutes } else { 0.0 },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregates_over_recorded_requests() {
        let log = RequestLog::new(100);
        for ms in 1..=20 {
            log.record("p1", Duration::from_millis(ms), ms % 10 != 0);
        }
        log.record("p2", Duration::from_millis(5), true);

        let metrics = log.aggregate("p1", Duration::from_secs(60));
        assert_eq!(metrics.requests, 20);
        assert_eq!(metrics.failures, 2);
        assert!((metrics.error_rate - 0.1).abs() < 1e-9);
        assert!((metrics.avg_latency_ms - 10.5).abs() < 0.01);
        assert!((metrics.p95_latency_ms - 19.0).abs() < 0.01);
        assert!((metrics.requests_per_minute - 20.0).abs() < 1e-9);
    }

    #[test]
    fn capacity_bounds_history() {
        let log = RequestLog::new(3);
        for _ in 0..10 {
            log.record("p1", Duration::from_millis(1), true);
        }
        assert_eq!(log.aggregate("p1", Duration::from_secs(60)).requests, 3);
    }

    #[test]
    fn unknown_project_is_empty() {
        let metrics = RequestLog::new(4).aggregate("nope", Duration::from_secs(60));
        assert_eq!(metrics.requests, 0);
        assert_eq!(metrics.error_rate, 0.0);
    }
}
