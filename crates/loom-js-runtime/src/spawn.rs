//! Context spawn function.
//!
//! Each context gets its own OS thread running a current-thread tokio
//! runtime; `spawn_context` resolves once the bundle has been evaluated and
//! the boot and start hooks have returned.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::thread;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};

use loom_modules::BoundModule;

use crate::bundle::CodeBundle;
use crate::engine::EngineSetup;
use crate::error::RuntimeError;
use crate::handle::ContextHandle;
use crate::services::ContextServices;
use crate::stats::{DEFAULT_HISTORY_LEN, StatsRecorder};
use crate::worker::run_context;

/// Engine limits and sampling settings for one context.
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Engine heap limit in bytes; `None` leaves it unbounded.
    pub memory_limit: Option<usize>,
    pub max_stack_size: usize,
    /// Length of one sparkline bucket.
    pub sample_interval: Duration,
    /// Buckets kept per sparkline.
    pub history_len: usize,
    /// Commands that may wait for the context; further ones are rejected as busy.
    pub command_queue: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            memory_limit: Some(64 * 1024 * 1024),
            max_stack_size: 512 * 1024,
            sample_interval: Duration::from_secs(1),
            history_len: DEFAULT_HISTORY_LEN,
            command_queue: 32,
        }
    }
}

/// Spawn a context for `project_id` and run it up to its start hooks.
///
/// `modules` are bound in order; the first bind failure rolls back the
/// ones already bound. On any error the thread exits on its own.
pub async fn spawn_context(
    project_id: impl Into<String>,
    bundle: CodeBundle,
    modules: Vec<BoundModule>,
    services: ContextServices,
    config: ContextConfig,
) -> Result<ContextHandle, RuntimeError> {
    let project_id = project_id.into();
    tracing::debug!(project = %project_id, label = %bundle.label, "spawning context");

    let interrupt = Arc::new(AtomicBool::new(false));
    let terminated = Arc::new(AtomicBool::new(false));
    let stats = Arc::new(StatsRecorder::new(config.history_len));

    let (cmd_tx, cmd_rx) = mpsc::channel(config.command_queue.max(1));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (ready_tx, ready_rx) = oneshot::channel();
    let (exit_tx, exit_rx) = oneshot::channel();

    let setup = EngineSetup {
        project_id: project_id.clone(),
        bundle,
        modules,
        services,
        config,
        interrupt: interrupt.clone(),
        stats: stats.clone(),
    };

    let thread_project = project_id.clone();
    let thread = thread::Builder::new()
        .name(format!("loom-ctx-{}", project_id))
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread().enable_time().build() {
                Ok(rt) => rt,
                Err(e) => {
                    let _ = ready_tx.send(Err(RuntimeError::SpawnFailed(e)));
                    return;
                }
            };

            let reason = rt.block_on(run_context(setup, cmd_rx, shutdown_rx, ready_tx));
            rt.shutdown_background();
            tracing::debug!(project = %thread_project, ?reason, "context thread exiting");
            let _ = exit_tx.send(reason);
        })?;

    let handle = ContextHandle::new(
        project_id,
        cmd_tx,
        shutdown_tx,
        terminated,
        interrupt,
        stats,
        exit_rx,
        thread,
    );

    match ready_rx.await {
        Ok(Ok(())) => Ok(handle),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(RuntimeError::ThreadPanic),
    }
}
