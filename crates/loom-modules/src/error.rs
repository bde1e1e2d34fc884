//! Module errors

/// Errors raised while loading, initializing, binding or calling a module.
#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    #[error("failed to load module from {origin}: {reason}")]
    Load { origin: String, reason: String },

    #[error("module {module} has an invalid schema: {reason}")]
    Schema { module: String, reason: String },

    #[error("module {module} failed to initialize: {reason}")]
    Init { module: String, reason: String },

    #[error("module {module} is not usable: {reason}")]
    Unusable { module: String, reason: String },

    #[error("module not found: {0}")]
    NotFound(String),

    #[error("module {module} failed to bind: {reason}")]
    Bind { module: String, reason: String },

    #[error("{module}.{method}: {reason}")]
    Call {
        module: String,
        method: String,
        reason: String,
    },

    #[error("module {module} has no method {method}")]
    MethodNotFound { module: String, method: String },

    #[error("IPC error: {0}")]
    Ipc(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ModuleError {
    /// Name of the module this error is about, when there is one.
    pub fn module(&self) -> Option<&str> {
        match self {
            ModuleError::Schema { module, .. }
            | ModuleError::Init { module, .. }
            | ModuleError::Unusable { module, .. }
            | ModuleError::Bind { module, .. }
            | ModuleError::Call { module, .. }
            | ModuleError::MethodNotFound { module, .. } => Some(module),
            ModuleError::NotFound(name) => Some(name),
            _ => None,
        }
    }
}

pub type ModuleResult<T> = Result<T, ModuleError>;
