//! Runtime Manager
//!
//! Lifecycle, isolation and statistics for per-project script contexts.

mod error;
mod relay;
mod request_log;
mod runtime;
mod status;

pub use error::{ManagerError, ManagerResult};
pub use request_log::{RequestLog, RequestMetrics};
pub use runtime::{ManagerConfig, RuntimeManager};
pub use status::{ProjectStats, StatusChange, StatusReason};
