//! Commands sent to the context worker thread.

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::RuntimeError;

pub(crate) enum ContextCommand {
    /// Run the route handler registered for `method path`.
    Invoke {
        method: String,
        path: String,
        request: Value,
        reply: oneshot::Sender<Result<Value, RuntimeError>>,
    },

    /// Answer (or abandonment) of a pending `ui.request`. Fire and forget.
    UiResponse {
        request_id: String,
        outcome: Result<Value, String>,
    },

    /// Run the shutdown hooks, then exit the worker loop.
    Shutdown {
        reply: oneshot::Sender<Result<(), RuntimeError>>,
    },
}

/// Why a context thread exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// A `Shutdown` command was processed.
    Shutdown,
    /// The handle was dropped or terminated.
    Abandoned,
    /// Boot did not complete; the error went to the spawner.
    BootFailed,
}
