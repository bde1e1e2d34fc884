//! Host Configuration
//!
//! Layered with figment: built-in defaults, then an optional TOML file, then
//! `LOOM_`-prefixed environment variables (`__` separates nesting levels,
//! e.g. `LOOM_SERVER__PORT=8080`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use loom_js_runtime::ContextConfig;
use loom_modules::ModuleConfig;

use crate::broadcaster::BroadcasterConfig;
use crate::hub::{ConnectionConfig, HubConfig};
use crate::manager::ManagerConfig;

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoomConfig {
    pub server: ServerConfig,
    pub projects: ProjectsConfig,
    pub modules: ModulesConfig,
    pub runtime: RuntimeSettings,
    pub hub: HubSettings,
    pub broadcaster: BroadcasterSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9700,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectsConfig {
    /// Root of the directory-backed project store
    pub dir: PathBuf,
    /// Start projects whose stored status is `running` at boot
    pub autostart: bool,
}

impl Default for ProjectsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./projects"),
            autostart: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModulesConfig {
    /// Directory scanned for artifact modules; skipped when absent
    pub dir: Option<PathBuf>,
    /// Load the modules shipped with the host
    pub builtin: bool,
    /// Per-module init config, keyed by module name
    pub config: HashMap<String, ModuleConfig>,
}

impl Default for ModulesConfig {
    fn default() -> Self {
        Self {
            dir: Some(PathBuf::from("./modules")),
            builtin: true,
            config: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    pub stop_grace_ms: u64,
    pub sample_interval_ms: u64,
    pub history_len: usize,
    /// Engine heap limit per context; 0 disables the limit
    pub memory_limit_mb: u64,
    pub max_stack_kb: usize,
    pub request_log_capacity: usize,
    /// Commands queued per context before new ones are rejected as busy
    pub command_queue: usize,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            stop_grace_ms: 5_000,
            sample_interval_ms: 1_000,
            history_len: 60,
            memory_limit_mb: 64,
            max_stack_kb: 512,
            request_log_capacity: 1_024,
            command_queue: 32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubSettings {
    pub mailbox: usize,
    pub client_queue: usize,
    pub ping_interval_secs: u64,
    pub idle_timeout_secs: u64,
    pub max_frames_per_write: usize,
    pub ui_request_ttl_secs: u64,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            mailbox: 1_024,
            client_queue: 64,
            ping_interval_secs: 30,
            idle_timeout_secs: 60,
            max_frames_per_write: 32,
            ui_request_ttl_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcasterSettings {
    pub monitor_interval_ms: u64,
    pub metrics_interval_ms: u64,
    pub metrics_window_secs: u64,
}

impl Default for BroadcasterSettings {
    fn default() -> Self {
        Self {
            monitor_interval_ms: 1_000,
            metrics_interval_ms: 30_000,
            metrics_window_secs: 300,
        }
    }
}

impl LoomConfig {
    /// The provider stack, exposed so callers can merge extra layers.
    pub fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(LoomConfig::default()));
        if let Some(file) = file {
            figment = figment.merge(Toml::file(file));
        }
        figment.merge(Env::prefixed("LOOM_").split("__"))
    }

    pub fn load(file: Option<&Path>) -> Result<Self, figment::Error> {
        Self::figment(file).extract()
    }

    pub fn manager(&self) -> ManagerConfig {
        let runtime = &self.runtime;
        ManagerConfig {
            stop_grace: Duration::from_millis(runtime.stop_grace_ms),
            request_log_capacity: runtime.request_log_capacity,
            context: ContextConfig {
                memory_limit: (runtime.memory_limit_mb > 0)
                    .then(|| (runtime.memory_limit_mb as usize) * 1024 * 1024),
                max_stack_size: runtime.max_stack_kb * 1024,
                sample_interval: Duration::from_millis(runtime.sample_interval_ms),
                history_len: runtime.history_len,
                command_queue: runtime.command_queue,
            },
        }
    }

    pub fn hub(&self) -> HubConfig {
        HubConfig {
            mailbox: self.hub.mailbox.max(1),
            ui_request_ttl: Duration::from_secs(self.hub.ui_request_ttl_secs),
            ..HubConfig::default()
        }
    }

    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            client_queue: self.hub.client_queue.max(1),
            ping_interval: Duration::from_secs(self.hub.ping_interval_secs.max(1)),
            idle_timeout: Duration::from_secs(self.hub.idle_timeout_secs.max(1)),
            max_frames_per_write: self.hub.max_frames_per_write.max(1),
        }
    }

    pub fn broadcaster(&self) -> BroadcasterConfig {
        BroadcasterConfig {
            monitor_interval: Duration::from_millis(self.broadcaster.monitor_interval_ms.max(10)),
            metrics_interval: Duration::from_millis(self.broadcaster.metrics_interval_ms.max(10)),
            metrics_window: Duration::from_secs(self.broadcaster.metrics_window_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use figment::Jail;

    use super::*;

    #[test]
    fn defaults_without_sources() {
        Jail::expect_with(|_| {
            let config = LoomConfig::load(None)?;
            assert_eq!(config, LoomConfig::default());
            assert_eq!(config.server.port, 9700);
            assert_eq!(config.broadcaster().monitor_interval, Duration::from_secs(1));
            assert_eq!(config.broadcaster().metrics_interval, Duration::from_secs(30));
            Ok(())
        });
    }

    #[test]
    fn file_then_env_layers() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "loom.toml",
                r#"
                [server]
                port = 8000

                [runtime]
                memory_limit_mb = 0

                [modules.config.kv]
                max_keys = 10
                "#,
            )?;
            jail.set_env("LOOM_SERVER__PORT", 8088);
            jail.set_env("LOOM_HUB__CLIENT_QUEUE", 8);

            let config = LoomConfig::load(Some(Path::new("loom.toml")))?;
            assert_eq!(config.server.port, 8088);
            assert_eq!(config.server.host, "0.0.0.0");
            assert_eq!(config.hub.client_queue, 8);
            assert_eq!(config.manager().context.memory_limit, None);
            assert_eq!(config.modules.config["kv"]["max_keys"], 10);
            Ok(())
        });
    }
}
