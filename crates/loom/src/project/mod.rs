//! Projects
//!
//! The host's view of the external project store.

mod controller;
mod source;
mod store;

pub use controller::{ControllerError, ProjectController};
pub use source::{ProjectStatus, RunningSource, RunningSourceError};
pub use store::{FsProjectStore, ProjectStore, StoreError};
