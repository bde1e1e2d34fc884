//! Runtime Manager
//!
//! Owns every live script context (at most one per project), serializes
//! lifecycle operations per project and publishes running-state changes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{Mutex, broadcast, oneshot};

use loom_js_runtime::{
    CodeBundle, ContextConfig, ContextHandle, ContextServices, ExitReason, LogSink, RuntimeError,
    UiChannel, spawn_context,
};
use loom_modules::Registry;

use super::error::{ManagerError, ManagerResult};
use super::relay::{LogRelay, UiRelay};
use super::request_log::RequestLog;
use super::status::{ProjectStats, StatusChange, StatusReason};
use crate::hub::UiResponseSink;

const STATUS_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// How long `stop` waits for the shutdown hooks before abandoning.
    pub stop_grace: Duration,
    pub request_log_capacity: usize,
    pub context: ContextConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            stop_grace: Duration::from_secs(5),
            request_log_capacity: 1_024,
            context: ContextConfig::default(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Live Context
// ─────────────────────────────────────────────────────────────────────────────

struct LiveContext {
    handle: Arc<ContextHandle>,
    started_at: DateTime<Utc>,
    generation: u64,
    label: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Runtime Manager
// ─────────────────────────────────────────────────────────────────────────────

/// Shared handle to the manager; cheap to clone.
#[derive(Clone)]
pub struct RuntimeManager {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Arc<Registry>,
    config: ManagerConfig,
    /// Per-project lifecycle locks, created on demand
    locks: DashMap<String, Arc<Mutex<()>>>,
    live: DashMap<String, LiveContext>,
    last_started: DashMap<String, DateTime<Utc>>,
    generation: AtomicU64,
    log: Arc<LogRelay>,
    ui: Arc<UiRelay>,
    status_tx: broadcast::Sender<StatusChange>,
    request_log: Arc<RequestLog>,
}

impl RuntimeManager {
    pub fn new(registry: Arc<Registry>, config: ManagerConfig) -> Self {
        let (status_tx, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        let request_log = Arc::new(RequestLog::new(config.request_log_capacity));
        Self {
            inner: Arc::new(Inner {
                registry,
                config,
                locks: DashMap::new(),
                live: DashMap::new(),
                last_started: DashMap::new(),
                generation: AtomicU64::new(0),
                log: Arc::new(LogRelay::default()),
                ui: Arc::new(UiRelay::default()),
                status_tx,
                request_log,
            }),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }

    fn project_lock(&self, project_id: &str) -> Arc<Mutex<()>> {
        self.inner
            .locks
            .entry(project_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Strictly increasing per project, even across clock adjustments.
    /// Called with the project lock held.
    fn next_started_at(&self, project_id: &str) -> DateTime<Utc> {
        let now = Utc::now();
        let started_at = match self.inner.last_started.get(project_id).map(|last| *last) {
            Some(last) if now <= last => last + chrono::Duration::microseconds(1),
            _ => now,
        };
        self.inner.last_started.insert(project_id.to_string(), started_at);
        started_at
    }

    fn publish(&self, change: StatusChange) {
        // No receivers is fine
        let _ = self.inner.status_tx.send(change);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Start `project_id` with `bundle`.
    ///
    /// The project is registered as live only after the bundle evaluated
    /// and the boot and start hooks returned.
    pub async fn start(&self, project_id: &str, bundle: CodeBundle) -> ManagerResult<()> {
        let lock = self.project_lock(project_id);
        let _guard = lock.lock().await;

        if self.inner.live.contains_key(project_id) {
            return Err(ManagerError::AlreadyRunning(project_id.to_string()));
        }

        let modules = self
            .inner
            .registry
            .resolve(&bundle.requires)
            .map_err(|e| ManagerError::from_module(project_id, e))?;

        let label = bundle.label.clone();
        let services = ContextServices {
            log: Some(self.inner.log.clone() as Arc<dyn LogSink>),
            ui: Some(self.inner.ui.clone() as Arc<dyn UiChannel>),
        };

        let handle = spawn_context(
            project_id,
            bundle,
            modules,
            services,
            self.inner.config.context.clone(),
        )
        .await
        .map_err(|e| {
            tracing::warn!(project = %project_id, error = %e, "project failed to start");
            ManagerError::from_runtime(project_id, e)
        })?;

        let started_at = self.next_started_at(project_id);
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = Arc::new(handle);
        let exit = handle.take_exit_signal();

        self.inner.live.insert(
            project_id.to_string(),
            LiveContext {
                handle,
                started_at,
                generation,
                label: label.clone(),
            },
        );
        if let Some(exit) = exit {
            self.watch_exit(project_id.to_string(), generation, exit);
        }

        tracing::info!(project = %project_id, label = %label, generation, "project started");
        self.publish(StatusChange::started(project_id, &label, started_at));
        Ok(())
    }

    /// Stop `project_id`, waiting up to the stop grace for its shutdown hooks.
    ///
    /// On timeout the context is interrupted and discarded anyway and
    /// `StopTimeout` is returned.
    pub async fn stop(&self, project_id: &str) -> ManagerResult<()> {
        let lock = self.project_lock(project_id);
        let _guard = lock.lock().await;

        let (_, live) = self
            .inner
            .live
            .remove(project_id)
            .ok_or_else(|| ManagerError::NotRunning(project_id.to_string()))?;

        let grace = self.inner.config.stop_grace;
        let (result, reason) = match tokio::time::timeout(grace, live.handle.shutdown()).await {
            Ok(Ok(())) => (Ok(()), StatusReason::Stopped),
            Ok(Err(e)) => {
                tracing::warn!(project = %project_id, error = %e, "shutdown did not complete cleanly");
                (Ok(()), StatusReason::Stopped)
            }
            Err(_) => {
                live.handle.terminate();
                tracing::warn!(project = %project_id, ?grace, "shutdown timed out, context abandoned");
                (
                    Err(ManagerError::StopTimeout {
                        project: project_id.to_string(),
                        grace,
                    }),
                    StatusReason::StopTimedOut,
                )
            }
        };

        tracing::info!(project = %project_id, label = %live.label, "project stopped");
        self.publish(StatusChange::stopped(project_id, &live.label, reason));
        result
    }

    /// Stop every live project concurrently; failures are logged together.
    pub async fn stop_all(&self) {
        let projects = self.running_projects();
        let results = futures::future::join_all(projects.iter().map(|p| self.stop(p))).await;

        let failures: Vec<String> = results
            .into_iter()
            .filter_map(Result::err)
            .filter(|e| !matches!(e, ManagerError::NotRunning(_)))
            .map(|e| e.to_string())
            .collect();

        if !failures.is_empty() {
            tracing::warn!(count = failures.len(), "some projects did not stop cleanly: {}", failures.join("; "));
        }
    }

    /// Remove a context whose thread exited on its own.
    fn watch_exit(&self, project_id: String, generation: u64, exit: oneshot::Receiver<ExitReason>) {
        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let reason = exit.await;
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let removed = inner
                .live
                .remove_if(&project_id, |_, live| live.generation == generation);
            if let Some((_, live)) = removed {
                tracing::error!(project = %project_id, ?reason, "context exited unexpectedly");
                let _ = inner
                    .status_tx
                    .send(StatusChange::stopped(&project_id, &live.label, StatusReason::Crashed));
            }
        });
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    pub fn is_running(&self, project_id: &str) -> bool {
        self.inner.live.contains_key(project_id)
    }

    pub fn running_projects(&self) -> Vec<String> {
        let mut projects: Vec<String> = self.inner.live.iter().map(|e| e.key().clone()).collect();
        projects.sort();
        projects
    }

    /// Snapshot of a project's statistics. Never waits on the context.
    pub fn stats(&self, project_id: &str) -> ManagerResult<ProjectStats> {
        let live = self
            .inner
            .live
            .get(project_id)
            .ok_or_else(|| ManagerError::NotRunning(project_id.to_string()))?;
        Ok(ProjectStats {
            project_id: project_id.to_string(),
            label: live.label.clone(),
            stats: live.handle.stats(live.started_at),
        })
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<StatusChange> {
        self.inner.status_tx.subscribe()
    }

    pub fn request_log(&self) -> &Arc<RequestLog> {
        &self.inner.request_log
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Requests and late-bound services
    // ─────────────────────────────────────────────────────────────────────────

    /// Invoke a route handler through the project's command queue.
    pub async fn invoke(&self, project_id: &str, method: &str, path: &str, request: Value) -> ManagerResult<Value> {
        let handle = self
            .inner
            .live
            .get(project_id)
            .map(|live| live.handle.clone())
            .ok_or_else(|| ManagerError::NotRunning(project_id.to_string()))?;

        let started = Instant::now();
        let result = handle.invoke(method, path, request).await;
        let ok = result.is_ok();
        if !matches!(result, Err(RuntimeError::Terminated | RuntimeError::ChannelClosed)) {
            self.inner.request_log.record(project_id, started.elapsed(), ok);
        }
        result.map_err(|e| ManagerError::from_runtime(project_id, e))
    }

    /// Route script console output to `sink`, including running contexts.
    pub fn set_log_broadcaster(&self, sink: Arc<dyn LogSink>) {
        self.inner.log.set(sink);
    }

    /// Route `ui.request` calls to `channel`, including running contexts.
    pub fn set_ui_channel(&self, channel: Arc<dyn UiChannel>) {
        self.inner.ui.set(channel);
    }
}

impl UiResponseSink for RuntimeManager {
    fn deliver(&self, project_id: &str, request_id: &str, outcome: Result<Value, String>) {
        let Some(live) = self.inner.live.get(project_id) else {
            tracing::debug!(project = %project_id, request = %request_id, "ui response for a stopped project dropped");
            return;
        };
        if let Err(e) = live.handle.deliver_ui_response(request_id.to_string(), outcome) {
            tracing::debug!(project = %project_id, request = %request_id, error = %e, "ui response not delivered");
        }
    }
}
