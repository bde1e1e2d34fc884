//! Loom Native Modules
//!
//! The contract for extending Script Contexts with host-provided
//! capabilities, the registry that loads and initializes modules at process
//! start, and the module implementations shipped with the host.
//!
//! # Architecture
//!
//! - [`NativeModule`] is the fixed contract: info, schema, init, bind,
//!   call, shutdown
//! - [`Registry`] owns every loaded module; after startup it is shared
//!   read-only and hands out [`BoundModule`] handles
//! - Built-in modules are plain Rust types; artifact modules run as child
//!   processes speaking the framed protocol in [`artifact::ipc`]

pub mod artifact;
pub mod builtin;
pub mod error;
pub mod module;
pub mod registry;
pub mod schema;

pub use artifact::ArtifactModule;
pub use builtin::builtin_modules;
pub use error::{ModuleError, ModuleResult};
pub use module::{Args, CallContext, ModuleConfig, ModuleInfo, NativeModule};
pub use registry::{
    BoundModule, ModuleDescriptor, ModuleOrigin, ModuleSource, ModuleStatus, ModuleSummary,
    Registry,
};
pub use schema::{FieldSchema, MethodSchema, ModuleSchema, NamespaceSchema, ParamSchema, TypeSchema};
