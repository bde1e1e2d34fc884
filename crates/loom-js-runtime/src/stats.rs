//! Per-context counters and sparkline history.
//!
//! The recorder is shared between the context thread (writer) and the
//! manager (reader). Reads take a short lock and copy; they never go through
//! the context's command queue.

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Default number of buckets kept per sparkline.
pub const DEFAULT_HISTORY_LEN: usize = 60;

/// Fixed-capacity buffer evicting the oldest entry on overflow.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, item: T) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn last(&self) -> Option<&T> {
        self.items.back()
    }

    /// Oldest first.
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

/// Sparkline series, oldest bucket first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct StatsHistory {
    /// Engine heap bytes at the end of each bucket.
    pub memory: Vec<u64>,
    /// Percentage of the bucket spent executing script code.
    pub cpu: Vec<f64>,
    /// Route invocations in each bucket.
    pub requests: Vec<u64>,
    /// Job firings in each bucket.
    pub jobs: Vec<u64>,
}

/// Point-in-time copy of a context's statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct StatsSnapshot {
    pub started_at: DateTime<Utc>,
    pub uptime_ms: u64,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub route_hits: BTreeMap<String, u64>,
    pub job_runs: BTreeMap<String, u64>,
    pub total_job_runs: u64,
    pub failed_job_runs: u64,
    pub memory_bytes: u64,
    pub history: StatsHistory,
}

struct StatsState {
    total_requests: u64,
    failed_requests: u64,
    route_hits: BTreeMap<String, u64>,
    job_runs: BTreeMap<String, u64>,
    total_job_runs: u64,
    failed_job_runs: u64,
    memory_bytes: u64,

    // Current bucket
    busy: Duration,
    bucket_started: Instant,
    requests_mark: u64,
    jobs_mark: u64,

    memory: RingBuffer<u64>,
    cpu: RingBuffer<f64>,
    requests: RingBuffer<u64>,
    jobs: RingBuffer<u64>,
}

/// Mutable counters of one script context.
pub struct StatsRecorder {
    state: Mutex<StatsState>,
}

impl StatsRecorder {
    pub fn new(history_len: usize) -> Self {
        Self {
            state: Mutex::new(StatsState {
                total_requests: 0,
                failed_requests: 0,
                route_hits: BTreeMap::new(),
                job_runs: BTreeMap::new(),
                total_job_runs: 0,
                failed_job_runs: 0,
                memory_bytes: 0,
                busy: Duration::ZERO,
                bucket_started: Instant::now(),
                requests_mark: 0,
                jobs_mark: 0,
                memory: RingBuffer::new(history_len),
                cpu: RingBuffer::new(history_len),
                requests: RingBuffer::new(history_len),
                jobs: RingBuffer::new(history_len),
            }),
        }
    }

    /// Count one route invocation. `route` is `None` when no handler matched.
    pub fn record_request(&self, route: Option<&str>, ok: bool) {
        let mut state = self.state.lock();
        state.total_requests += 1;
        if !ok {
            state.failed_requests += 1;
        }
        if let Some(route) = route {
            *state.route_hits.entry(route.to_string()).or_insert(0) += 1;
        }
    }

    pub fn record_job(&self, name: &str, ok: bool) {
        let mut state = self.state.lock();
        state.total_job_runs += 1;
        if !ok {
            state.failed_job_runs += 1;
        }
        *state.job_runs.entry(name.to_string()).or_insert(0) += 1;
    }

    /// Account time spent inside the engine toward the current CPU bucket.
    pub fn add_busy(&self, elapsed: Duration) {
        self.state.lock().busy += elapsed;
    }

    /// Close the current bucket and push one point onto every sparkline.
    pub fn sample(&self, memory_bytes: u64) {
        let mut state = self.state.lock();
        let now = Instant::now();
        let window = now.duration_since(state.bucket_started);

        let cpu = if window.is_zero() {
            0.0
        } else {
            (state.busy.as_secs_f64() / window.as_secs_f64() * 100.0).clamp(0.0, 100.0)
        };
        let requests = state.total_requests - state.requests_mark;
        let jobs = state.total_job_runs - state.jobs_mark;

        state.memory_bytes = memory_bytes;
        state.memory.push(memory_bytes);
        state.cpu.push(cpu);
        state.requests.push(requests);
        state.jobs.push(jobs);

        state.busy = Duration::ZERO;
        state.bucket_started = now;
        state.requests_mark = state.total_requests;
        state.jobs_mark = state.total_job_runs;
    }

    pub fn snapshot(&self, started_at: DateTime<Utc>) -> StatsSnapshot {
        let state = self.state.lock();
        let uptime_ms = (Utc::now() - started_at).num_milliseconds().max(0) as u64;
        StatsSnapshot {
            started_at,
            uptime_ms,
            total_requests: state.total_requests,
            failed_requests: state.failed_requests,
            route_hits: state.route_hits.clone(),
            job_runs: state.job_runs.clone(),
            total_job_runs: state.total_job_runs,
            failed_job_runs: state.failed_job_runs,
            memory_bytes: state.memory_bytes,
            history: StatsHistory {
                memory: state.memory.to_vec(),
                cpu: state.cpu.to_vec(),
                requests: state.requests.to_vec(),
                jobs: state.jobs.to_vec(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_buffer_evicts_oldest() {
        let mut ring = RingBuffer::new(3);
        for i in 1..=5 {
            ring.push(i);
        }
        assert_eq!(ring.to_vec(), vec![3, 4, 5]);
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.last(), Some(&5));
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut ring = RingBuffer::new(0);
        ring.push("a");
        ring.push("b");
        assert_eq!(ring.capacity(), 1);
        assert_eq!(ring.to_vec(), vec!["b"]);
    }

    #[test]
    fn counters_and_buckets() {
        let stats = StatsRecorder::new(4);
        stats.record_request(Some("GET /a"), true);
        stats.record_request(Some("GET /a"), false);
        stats.record_request(None, false);
        stats.record_job("tick", true);
        stats.sample(1024);

        stats.record_request(Some("POST /b"), true);
        stats.sample(2048);

        let snap = stats.snapshot(Utc::now());
        assert_eq!(snap.total_requests, 4);
        assert_eq!(snap.failed_requests, 2);
        assert_eq!(snap.route_hits.get("GET /a"), Some(&2));
        assert_eq!(snap.route_hits.get("POST /b"), Some(&1));
        assert_eq!(snap.job_runs.get("tick"), Some(&1));
        assert_eq!(snap.total_job_runs, 1);
        assert_eq!(snap.memory_bytes, 2048);
        assert_eq!(snap.history.requests, vec![3, 1]);
        assert_eq!(snap.history.jobs, vec![1, 0]);
        assert_eq!(snap.history.memory, vec![1024, 2048]);
        assert!(snap.history.cpu.iter().all(|c| (0.0..=100.0).contains(c)));
    }

    #[test]
    fn snapshot_serializes_camel_case() {
        let stats = StatsRecorder::new(2);
        let json = serde_json::to_value(stats.snapshot(Utc::now())).unwrap();
        assert_eq!(json["totalRequests"], 0);
        assert!(json.get("startedAt").is_some());
        assert!(json["history"]["memory"].as_array().unwrap().is_empty());
    }
}
