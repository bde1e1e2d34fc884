//! Loom script contexts
//!
//! One isolated QuickJS environment per project, each on its own OS thread
//! with a current-thread tokio runtime.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐   ContextCommand    ┌──────────────────────────┐
//! │  ContextHandle   │ ──────────────────► │ context thread           │
//! │  (any task)      │ ◄────────────────── │  Engine (rquickjs)       │
//! └──────────────────┘   oneshot replies   │  job timers, sampling    │
//!          │                               └──────────────────────────┘
//!          └── StatsRecorder (shared, lock-and-copy reads)
//! ```
//!
//! Scripts see `service`, `console`, `ui`, `modules` and `require`; native
//! modules are bound from their schemas at boot.
//!
//! # Example
//!
//! ```ignore
//! use loom_js_runtime::{CodeBundle, ContextConfig, ContextServices, spawn_context};
//!
//! let bundle = CodeBundle::new("release:1.0.0", r#"
//!     service.route("GET", "/hello", (req) => ({ hello: service.projectId }));
//! "#);
//! let ctx = spawn_context("p1", bundle, vec![], ContextServices::default(), ContextConfig::default()).await?;
//! let reply = ctx.invoke("GET", "/hello", serde_json::json!({})).await?;
//! ctx.shutdown().await?;
//! ```

mod binder;
mod bundle;
mod command;
mod engine;
mod error;
mod handle;
mod services;
mod spawn;
mod stats;
mod worker;

pub use bundle::CodeBundle;
pub use command::ExitReason;
pub use error::RuntimeError;
pub use handle::ContextHandle;
pub use services::{ContextServices, LogLevel, LogSink, UiChannel};
pub use spawn::{ContextConfig, spawn_context};
pub use stats::{DEFAULT_HISTORY_LEN, RingBuffer, StatsHistory, StatsRecorder, StatsSnapshot};
