//! Host wiring
//!
//! Builds the registry, manager, hub, broadcaster and project controller from
//! a [`LoomConfig`] and connects them to each other.

use std::sync::Arc;

use axum::Router;
use serde_json::json;
use tokio::task::JoinHandle;

use loom_js_runtime::{LogSink, UiChannel};
use loom_modules::{ModuleSource, Registry, builtin_modules};

use crate::broadcaster::{Broadcaster, MetricsSource, StatsSource};
use crate::config::{LoomConfig, ModulesConfig};
use crate::hub::{EventKind, Hub, HubHandle, UiResponseSink};
use crate::manager::RuntimeManager;
use crate::project::{FsProjectStore, ProjectController};
use crate::server::{AppState, create_router};

/// Load and initialize every configured module. Failures are logged and
/// leave the module out; they never abort the host.
pub fn load_registry(modules: &ModulesConfig) -> Registry {
    let mut registry = Registry::new();
    let mut failures = Vec::new();

    if modules.builtin {
        failures.extend(registry.load_all(builtin_modules().into_iter().map(ModuleSource::Builtin)));
    }
    if let Some(dir) = &modules.dir {
        failures.extend(registry.discover(dir));
    }
    failures.extend(registry.init_all(&modules.config));

    for error in &failures {
        tracing::warn!(error = %error, "module unavailable");
    }
    tracing::info!(
        modules = registry.len(),
        ready = registry.descriptors().filter(|d| d.is_ready()).count(),
        "module registry ready"
    );
    registry
}

pub struct Host {
    config: LoomConfig,
    registry: Arc<Registry>,
    manager: RuntimeManager,
    hub: HubHandle,
    hub_task: JoinHandle<()>,
    controller: ProjectController,
    broadcaster: Broadcaster,
}

impl Host {
    /// Wire every component and, when configured, autostart projects.
    pub async fn start(config: LoomConfig) -> Self {
        let registry = Arc::new(load_registry(&config.modules));
        let manager = RuntimeManager::new(registry.clone(), config.manager());

        let sink: Arc<dyn UiResponseSink> = Arc::new(manager.clone());
        let (hub, hub_task) = Hub::spawn(config.hub(), Some(sink));
        manager.set_log_broadcaster(Arc::new(hub.clone()) as Arc<dyn LogSink>);
        manager.set_ui_channel(Arc::new(hub.clone()) as Arc<dyn UiChannel>);

        let broadcaster = Broadcaster::start(
            config.broadcaster(),
            hub.clone(),
            Arc::new(manager.clone()) as Arc<dyn StatsSource>,
            Arc::new(manager.clone()) as Arc<dyn MetricsSource>,
            manager.subscribe_status(),
        );

        let store = Arc::new(FsProjectStore::new(config.projects.dir.clone()));
        let controller = ProjectController::new(manager.clone(), store);

        if config.projects.autostart {
            if let Err(e) = controller.autostart().await {
                tracing::error!(error = %e, "autostart failed");
            }
        }

        Self {
            config,
            registry,
            manager,
            hub,
            hub_task,
            controller,
            broadcaster,
        }
    }

    pub fn config(&self) -> &LoomConfig {
        &self.config
    }

    pub fn manager(&self) -> &RuntimeManager {
        &self.manager
    }

    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    pub fn controller(&self) -> &ProjectController {
        &self.controller
    }

    pub fn router(&self) -> Router {
        create_router(AppState::new(
            self.controller.clone(),
            self.hub.clone(),
            self.config.connection(),
        ))
    }

    /// Stop everything in dependency order: pushes, projects, modules.
    pub async fn shutdown(self) {
        if let Err(e) = self.hub.broadcast_to_all(EventKind::Server, json!({ "state": "shutting_down" })).await {
            tracing::debug!(error = %e, "shutdown notice not sent");
        }
        self.broadcaster.stop().await;

        tracing::info!("stopping projects");
        self.manager.stop_all().await;
        self.registry.shutdown_all();

        // The manager's relays keep hub handles alive; the hub task is detached
        drop(self.hub_task);
        tracing::info!("host stopped");
    }
}
