//! Error types for script contexts.

/// Errors that can occur in a script context.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("Script context has terminated")]
    Terminated,

    #[error("Channel closed")]
    ChannelClosed,

    /// The command queue is full; the context is not keeping up.
    #[error("Script context is busy")]
    Busy,

    #[error("Script context thread panicked")]
    ThreadPanic,

    #[error("Failed to spawn thread: {0}")]
    SpawnFailed(#[from] std::io::Error),

    /// The engine itself could not be created or configured.
    #[error("Engine error: {0}")]
    Engine(String),

    /// The service bundle failed to evaluate.
    #[error("Compile error: {0}")]
    Compile(String),

    #[error("Failed to bind module {module}: {reason}")]
    ModuleBind { module: String, reason: String },

    /// A lifecycle hook (`boot`, `start`, `shutdown`) threw.
    #[error("{hook} hook failed: {message}")]
    Hook { hook: String, message: String },

    #[error("No route registered for {method} {path}")]
    RouteNotFound { method: String, path: String },

    /// A route handler threw or returned something that is not JSON.
    #[error("Script error: {0}")]
    Script(String),
}
