//! Host services reachable from a running script.
//!
//! Both services are optional: a context without a log sink still logs
//! through `tracing`, and one without a UI channel refuses `ui.request`.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Severity of a line written through `console.*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debug" => Ok(LogLevel::Debug),
            "info" | "log" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level: {}", other)),
        }
    }
}

/// Receives console output from scripts.
///
/// Called on the context thread, so implementations must not block.
pub trait LogSink: Send + Sync + 'static {
    fn emit(&self, project_id: &str, level: LogLevel, message: &str);
}

/// Routes an interactive request raised by `ui.request` to a client session.
///
/// Returns `false` when the request was refused outright; the answer (or a
/// later abandonment) comes back through
/// [`ContextHandle::deliver_ui_response`](crate::ContextHandle::deliver_ui_response).
pub trait UiChannel: Send + Sync + 'static {
    fn request(&self, project_id: &str, session_id: &str, request_id: &str, schema: Value) -> bool;
}

/// Services injected into a context at spawn time.
#[derive(Clone, Default)]
pub struct ContextServices {
    pub log: Option<Arc<dyn LogSink>>,
    pub ui: Option<Arc<dyn UiChannel>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_log_maps_to_info() {
        assert_eq!("log".parse::<LogLevel>().unwrap(), LogLevel::Info);
        assert_eq!("warn".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("trace".parse::<LogLevel>().is_err());
    }
}
