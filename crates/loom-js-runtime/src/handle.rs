//! Handle to a running script context.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};

use crate::command::{ContextCommand, ExitReason};
use crate::error::RuntimeError;
use crate::stats::{StatsRecorder, StatsSnapshot};

/// Owning handle to a context thread.
///
/// Dropping the handle terminates the context without running its shutdown
/// hooks. The thread is never joined from here: a context stuck in a
/// synchronous loop only exits once the engine notices the interrupt flag.
pub struct ContextHandle {
    project_id: String,
    cmd_tx: mpsc::Sender<ContextCommand>,
    shutdown_tx: watch::Sender<bool>,
    terminated: Arc<AtomicBool>,
    /// Polled by the engine's interrupt handler.
    interrupt: Arc<AtomicBool>,
    stats: Arc<StatsRecorder>,
    exit_rx: Mutex<Option<oneshot::Receiver<ExitReason>>>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Construction
// ─────────────────────────────────────────────────────────────────────────────

impl ContextHandle {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        project_id: String,
        cmd_tx: mpsc::Sender<ContextCommand>,
        shutdown_tx: watch::Sender<bool>,
        terminated: Arc<AtomicBool>,
        interrupt: Arc<AtomicBool>,
        stats: Arc<StatsRecorder>,
        exit_rx: oneshot::Receiver<ExitReason>,
        thread: thread::JoinHandle<()>,
    ) -> Self {
        Self {
            project_id,
            cmd_tx,
            shutdown_tx,
            terminated,
            interrupt,
            stats,
            exit_rx: Mutex::new(Some(exit_rx)),
            thread: Mutex::new(Some(thread)),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

impl ContextHandle {
    /// Queue a command and wait for its reply. A full queue is reported as
    /// [`RuntimeError::Busy`] instead of waiting behind a stuck context.
    async fn send_command<T, F>(&self, make_cmd: F) -> Result<T, RuntimeError>
    where
        F: FnOnce(oneshot::Sender<Result<T, RuntimeError>>) -> ContextCommand,
    {
        if self.is_terminated() {
            return Err(RuntimeError::Terminated);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.enqueue(make_cmd(reply_tx))?;

        reply_rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    fn enqueue(&self, command: ContextCommand) -> Result<(), RuntimeError> {
        self.cmd_tx.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                tracing::warn!(project = %self.project_id, "context command queue full");
                RuntimeError::Busy
            }
            mpsc::error::TrySendError::Closed(_) => RuntimeError::ChannelClosed,
        })
    }

    /// Run the route handler registered for `method path`.
    pub async fn invoke(&self, method: &str, path: &str, request: Value) -> Result<Value, RuntimeError> {
        let method = method.to_string();
        let path = path.to_string();
        self.send_command(|reply| ContextCommand::Invoke {
            method,
            path,
            request,
            reply,
        })
        .await
    }

    /// Queue the answer to a pending `ui.request`. Does not wait.
    pub fn deliver_ui_response(&self, request_id: String, outcome: Result<Value, String>) -> Result<(), RuntimeError> {
        if self.is_terminated() {
            return Err(RuntimeError::Terminated);
        }
        self.enqueue(ContextCommand::UiResponse { request_id, outcome })
    }

    /// Run the shutdown hooks and let the thread exit.
    ///
    /// The thread exits even when a hook throws; the error is returned.
    ///
    /// Unlike other commands this waits for queue capacity.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        let result = self.request_shutdown().await;
        self.terminated.store(true, Ordering::SeqCst);
        result
    }

    async fn request_shutdown(&self) -> Result<(), RuntimeError> {
        if self.is_terminated() {
            return Err(RuntimeError::Terminated);
        }
        let (reply, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(ContextCommand::Shutdown { reply })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        reply_rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Termination and observation
// ─────────────────────────────────────────────────────────────────────────────

impl ContextHandle {
    /// Stop the context without running hooks and interrupt any running script.
    pub fn terminate(&self) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        self.interrupt.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Copy of the current counters. Never touches the command queue.
    pub fn stats(&self, started_at: DateTime<Utc>) -> StatsSnapshot {
        self.stats.snapshot(started_at)
    }

    /// Resolves when the context thread exits; errors if it panicked.
    ///
    /// Can be taken once.
    pub fn take_exit_signal(&self) -> Option<oneshot::Receiver<ExitReason>> {
        self.exit_rx.lock().take()
    }
}

impl Drop for ContextHandle {
    fn drop(&mut self) {
        self.terminate();
        // Detach; joining could block on a script that ignores the interrupt
        self.thread.lock().take();
    }
}
