//! Module Registry
//!
//! Loads every module once at process start, initializes them, and hands out
//! cheap [`BoundModule`] handles to Script Contexts. A bad module is isolated:
//! it is reported and excluded, and the rest keep working.
//!
//! The registry is mutated only during startup (`load`, `init_all`); after
//! that it is shared read-only behind an `Arc`.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::artifact::{ArtifactModule, MANIFEST_FILE};
use crate::error::{ModuleError, ModuleResult};
use crate::module::{ModuleConfig, ModuleInfo, NativeModule};
use crate::schema::ModuleSchema;

// ─────────────────────────────────────────────────────────────────────────────
// Descriptor types
// ─────────────────────────────────────────────────────────────────────────────

/// Where a module comes from
pub enum ModuleSource {
    /// Compiled into the host
    Builtin(Arc<dyn NativeModule>),
    /// Directory containing `module.toml`
    Artifact(PathBuf),
}

impl ModuleSource {
    fn describe(&self) -> String {
        match self {
            ModuleSource::Builtin(module) => format!("builtin:{}", module.info().name),
            ModuleSource::Artifact(dir) => dir.display().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleOrigin {
    Builtin,
    Artifact(PathBuf),
}

/// Lifecycle state of a loaded module
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum ModuleStatus {
    /// Loaded, `init` not yet run
    Loaded,
    /// Initialized and bindable
    Ready,
    /// `init` failed; never bound
    Failed(String),
}

/// A loaded module and what the registry knows about it
pub struct ModuleDescriptor {
    info: ModuleInfo,
    schema: Arc<ModuleSchema>,
    origin: ModuleOrigin,
    status: ModuleStatus,
    module: Arc<dyn NativeModule>,
}

impl ModuleDescriptor {
    pub fn info(&self) -> &ModuleInfo {
        &self.info
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn schema(&self) -> &ModuleSchema {
        &self.schema
    }

    pub fn origin(&self) -> &ModuleOrigin {
        &self.origin
    }

    pub fn status(&self) -> &ModuleStatus {
        &self.status
    }

    pub fn is_ready(&self) -> bool {
        self.status == ModuleStatus::Ready
    }

    fn bound(&self) -> BoundModule {
        BoundModule {
            name: self.info.name.clone(),
            schema: Arc::clone(&self.schema),
            module: Arc::clone(&self.module),
        }
    }
}

/// Handle moved into a Script Context; shares the backing module.
#[derive(Clone)]
pub struct BoundModule {
    pub name: String,
    pub schema: Arc<ModuleSchema>,
    pub module: Arc<dyn NativeModule>,
}

impl std::fmt::Debug for BoundModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundModule").field("name", &self.name).finish()
    }
}

/// Serializable view of a module for listings
#[derive(Debug, Clone, Serialize)]
pub struct ModuleSummary {
    pub name: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub origin: ModuleOrigin,
    pub status: ModuleStatus,
    pub schema: ModuleSchema,
    pub declaration: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct Registry {
    /// Load order is preserved; shutdown walks it backwards
    modules: Vec<ModuleDescriptor>,
    shut_down: AtomicBool,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load one module. Fails with `Load` or `Schema` without touching the
    /// modules already loaded.
    pub fn load(&mut self, source: ModuleSource) -> ModuleResult<&ModuleDescriptor> {
        let origin_text = source.describe();
        let (module, origin): (Arc<dyn NativeModule>, ModuleOrigin) = match source {
            ModuleSource::Builtin(module) => (module, ModuleOrigin::Builtin),
            ModuleSource::Artifact(dir) => {
                let module = ArtifactModule::open(&dir)?;
                (Arc::new(module), ModuleOrigin::Artifact(dir))
            }
        };

        let info = module.info();
        let schema = module.schema();

        if let Err(reason) = validate_name(&info.name) {
            return Err(ModuleError::Schema {
                module: origin_text,
                reason,
            });
        }
        schema.validate().map_err(|reason| ModuleError::Schema {
            module: info.name.clone(),
            reason,
        })?;
        if self.get(&info.name).is_some() {
            return Err(ModuleError::Load {
                origin: origin_text,
                reason: format!("a module named {} is already loaded", info.name),
            });
        }

        info!(module = %info.name, version = %info.version, "Loaded module");
        self.modules.push(ModuleDescriptor {
            info,
            schema: Arc::new(schema),
            origin,
            status: ModuleStatus::Loaded,
            module,
        });
        let index = self.modules.len() - 1;
        Ok(&self.modules[index])
    }

    /// Load several modules, isolating failures. Returns the failures.
    pub fn load_all(&mut self, sources: impl IntoIterator<Item = ModuleSource>) -> Vec<ModuleError> {
        let mut failures = Vec::new();
        for source in sources {
            if let Err(e) = self.load(source) {
                error!("Module load failed: {}", e);
                failures.push(e);
            }
        }
        failures
    }

    /// Load every artifact directory directly under `dir`.
    ///
    /// A missing directory is not an error; there is simply nothing to load.
    pub fn discover(&mut self, dir: &Path) -> Vec<ModuleError> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Module directory {} does not exist", dir.display());
                return Vec::new();
            }
            Err(e) => {
                return vec![ModuleError::Load {
                    origin: dir.display().to_string(),
                    reason: e.to_string(),
                }];
            }
        };

        let mut artifacts: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.join(MANIFEST_FILE).is_file())
            .collect();
        artifacts.sort();

        self.load_all(artifacts.into_iter().map(ModuleSource::Artifact))
    }

    /// Run `init` once on every loaded module. A failing module is marked
    /// `Failed` and excluded from binding. Returns the failures.
    pub fn init_all(&mut self, configs: &HashMap<String, ModuleConfig>) -> Vec<ModuleError> {
        let mut failures = Vec::new();

        for descriptor in &mut self.modules {
            if descriptor.status != ModuleStatus::Loaded {
                continue;
            }

            let config = configs.get(&descriptor.info.name).cloned().unwrap_or_default();
            let result = catch_unwind(AssertUnwindSafe(|| descriptor.module.init(&config)))
                .unwrap_or_else(|_| {
                    Err(ModuleError::Init {
                        module: descriptor.info.name.clone(),
                        reason: "init panicked".to_string(),
                    })
                });

            match result {
                Ok(()) => {
                    info!(module = %descriptor.info.name, "Module ready");
                    descriptor.status = ModuleStatus::Ready;
                }
                Err(e) => {
                    error!(module = %descriptor.info.name, "Module init failed: {}", e);
                    descriptor.status = ModuleStatus::Failed(e.to_string());
                    failures.push(e);
                }
            }
        }

        failures
    }

    pub fn get(&self, name: &str) -> Option<&ModuleDescriptor> {
        self.modules.iter().find(|d| d.info.name == name)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ModuleDescriptor> {
        self.modules.iter()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Modules to bind into a new Script Context: every `Ready` module.
    ///
    /// Fails if any module in `required` is unknown or not `Ready`, so a
    /// project never runs without a capability it declared.
    pub fn resolve(&self, required: &[String]) -> ModuleResult<Vec<BoundModule>> {
        for name in required {
            let descriptor = self
                .get(name)
                .ok_or_else(|| ModuleError::NotFound(name.clone()))?;
            match &descriptor.status {
                ModuleStatus::Ready => {}
                ModuleStatus::Failed(reason) => {
                    return Err(ModuleError::Unusable {
                        module: name.clone(),
                        reason: reason.clone(),
                    });
                }
                ModuleStatus::Loaded => {
                    return Err(ModuleError::Unusable {
                        module: name.clone(),
                        reason: "module was never initialized".to_string(),
                    });
                }
            }
        }

        Ok(self
            .modules
            .iter()
            .filter(|d| d.is_ready())
            .map(ModuleDescriptor::bound)
            .collect())
    }

    pub fn summaries(&self) -> Vec<ModuleSummary> {
        self.modules
            .iter()
            .map(|d| ModuleSummary {
                name: d.info.name.clone(),
                version: d.info.version.to_string(),
                description: d.info.description.clone(),
                author: d.info.author.clone(),
                origin: d.origin.clone(),
                status: d.status.clone(),
                schema: (*d.schema).clone(),
                declaration: d.schema.to_declaration(&d.info.name),
            })
            .collect()
    }

    /// Shut down every `Ready` module in reverse load order. Best-effort and
    /// idempotent.
    pub fn shutdown_all(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        for descriptor in self.modules.iter().rev().filter(|d| d.is_ready()) {
            debug!(module = %descriptor.info.name, "Shutting down module");
            if catch_unwind(AssertUnwindSafe(|| descriptor.module.shutdown())).is_err() {
                warn!(module = %descriptor.info.name, "Module shutdown panicked");
            }
        }
    }
}

fn validate_name(name: &str) -> Result<(), String> {
    let mut chars = name.chars();
    match chars.next() {
        None => Err("module name is missing".to_string()),
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            if chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
                Ok(())
            } else {
                Err(format!("invalid module name {:?}", name))
            }
        }
        Some(_) => Err(format!("invalid module name {:?}", name)),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
