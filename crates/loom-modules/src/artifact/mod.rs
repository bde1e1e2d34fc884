//! Externally supplied modules
//!
//! An artifact is a directory holding a `module.toml` manifest and an
//! executable that speaks the module IPC protocol over stdin/stdout.

pub mod ipc;
mod manifest;
mod process;

pub use manifest::{ArtifactCommand, ArtifactManifest, MANIFEST_FILE};
pub use process::ArtifactModule;
