//! Loom - multi-tenant JavaScript service host
//!
//! This crate provides the host process:
//! - Runtime manager owning one script context per running project
//! - Event hub fanning project events out to WebSocket clients
//! - Broadcaster turning manager state into `monitor`, `metrics` and `status` pushes
//! - Directory-backed project store and the HTTP/WebSocket server

// Re-export core crates
pub use loom_js_runtime;
pub use loom_modules;

pub mod app;
pub mod broadcaster;
pub mod config;
pub mod hub;
pub mod manager;
pub mod project;
pub mod server;

pub use app::{Host, load_registry};
pub use config::LoomConfig;
