//! Server Application State

use std::sync::Arc;

use crate::hub::{ConnectionConfig, HubHandle};
use crate::manager::RuntimeManager;
use crate::project::ProjectController;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    controller: ProjectController,
    hub: HubHandle,
    connection: ConnectionConfig,
}

impl AppState {
    pub fn new(controller: ProjectController, hub: HubHandle, connection: ConnectionConfig) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                controller,
                hub,
                connection,
            }),
        }
    }

    pub fn controller(&self) -> &ProjectController {
        &self.inner.controller
    }

    pub fn manager(&self) -> &RuntimeManager {
        self.inner.controller.manager()
    }

    pub fn hub(&self) -> &HubHandle {
        &self.inner.hub
    }

    pub fn connection(&self) -> &ConnectionConfig {
        &self.inner.connection
    }
}
