use std::time::Duration;

use loom_js_runtime::RuntimeError;
use loom_modules::ModuleError;

/// Errors returned by [`RuntimeManager`](super::RuntimeManager) operations.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("project {0} is already running")]
    AlreadyRunning(String),

    #[error("project {0} is not running")]
    NotRunning(String),

    #[error("project {project} failed to compile: {reason}")]
    Compile { project: String, reason: String },

    #[error("project {project}: module init failed: {reason}")]
    ModuleInit { project: String, reason: String },

    #[error("project {project}: {hook} hook failed: {message}")]
    Hook {
        project: String,
        hook: String,
        message: String,
    },

    /// The context was discarded anyway; the project is no longer running.
    #[error("project {project} did not stop within {grace:?}")]
    StopTimeout { project: String, grace: Duration },

    #[error("project {project}: no route for {method} {path}")]
    RouteNotFound {
        project: String,
        method: String,
        path: String,
    },

    #[error("project {project}: {message}")]
    Script { project: String, message: String },

    #[error("project {0} is busy")]
    Busy(String),

    #[error("project {project}: {source}")]
    Runtime {
        project: String,
        #[source]
        source: RuntimeError,
    },
}

impl ManagerError {
    pub(crate) fn from_runtime(project: &str, error: RuntimeError) -> Self {
        let project = project.to_string();
        match error {
            RuntimeError::Compile(reason) => ManagerError::Compile { project, reason },
            RuntimeError::ModuleBind { module, reason } => ManagerError::ModuleInit {
                project,
                reason: format!("{}: {}", module, reason),
            },
            RuntimeError::Hook { hook, message } => ManagerError::Hook {
                project,
                hook,
                message,
            },
            RuntimeError::RouteNotFound { method, path } => ManagerError::RouteNotFound {
                project,
                method,
                path,
            },
            RuntimeError::Script(message) => ManagerError::Script { project, message },
            RuntimeError::Terminated | RuntimeError::ChannelClosed => ManagerError::NotRunning(project),
            RuntimeError::Busy => ManagerError::Busy(project),
            source => ManagerError::Runtime { project, source },
        }
    }

    pub(crate) fn from_module(project: &str, error: ModuleError) -> Self {
        ManagerError::ModuleInit {
            project: project.to_string(),
            reason: error.to_string(),
        }
    }
}

pub type ManagerResult<T> = Result<T, ManagerError>;
