//! `kv` module: per-project key/value store
//!
//! Values live in process memory and survive context restarts. Every
//! operation is scoped to the calling project.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use serde_json::Value;

use crate::error::{ModuleError, ModuleResult};
use crate::module::{Args, CallContext, ModuleConfig, ModuleInfo, NativeModule};
use crate::schema::{MethodSchema, ModuleSchema};

const DEFAULT_MAX_KEYS: usize = 10_000;

/// In-memory key/value store partitioned by project
pub struct KvModule {
    partitions: DashMap<String, BTreeMap<String, Value>>,
    max_keys: AtomicUsize,
}

impl Default for KvModule {
    fn default() -> Self {
        Self::new()
    }
}

impl KvModule {
    pub fn new() -> Self {
        Self {
            partitions: DashMap::new(),
            max_keys: AtomicUsize::new(DEFAULT_MAX_KEYS),
        }
    }

    fn set(&self, project: &str, key: &str, value: Value, args: &Args<'_>) -> ModuleResult<Value> {
        let max_keys = self.max_keys.load(Ordering::Relaxed);
        let mut partition = self.partitions.entry(project.to_string()).or_default();

        if !partition.contains_key(key) && partition.len() >= max_keys {
            return Err(args.error(format!("key limit of {} reached", max_keys)));
        }
        partition.insert(key.to_string(), value);
        Ok(Value::Null)
    }
}

impl NativeModule for KvModule {
    fn info(&self) -> ModuleInfo {
        ModuleInfo::new("kv", semver::Version::new(1, 0, 0))
            .describe("Per-project key/value store")
            .author("loom")
    }

    fn schema(&self) -> ModuleSchema {
        ModuleSchema::new()
            .method(
                MethodSchema::new("get")
                    .describe("Value stored under key, or null")
                    .param("key", "string")
                    .returns("any"),
            )
            .method(
                MethodSchema::new("set")
                    .describe("Store a JSON-compatible value under key")
                    .param("key", "string")
                    .param("value", "any"),
            )
            .method(
                MethodSchema::new("delete")
                    .describe("Remove key; true if it existed")
                    .param("key", "string")
                    .returns("boolean"),
            )
            .method(MethodSchema::new("keys").describe("All keys, sorted").returns("string[]"))
            .method(
                MethodSchema::new("clear")
                    .describe("Remove every key; returns how many were removed")
                    .returns("number"),
            )
    }

    fn init(&self, config: &ModuleConfig) -> ModuleResult<()> {
        match config.get("max_keys") {
            None => Ok(()),
            Some(value) => match value.as_u64() {
                Some(n) if n > 0 => {
                    self.max_keys.store(n as usize, Ordering::Relaxed);
                    Ok(())
                }
                _ => Err(ModuleError::Init {
                    module: "kv".to_string(),
                    reason: format!("max_keys must be a positive integer, got {}", value),
                }),
            },
        }
    }

    fn bind(&self, project_id: &str) -> ModuleResult<()> {
        self.partitions.entry(project_id.to_string()).or_default();
        Ok(())
    }

    fn call(&self, ctx: &CallContext<'_>, method: &str, args: Vec<Value>) -> ModuleResult<Value> {
        let args = Args::new("kv", method, &args);
        let project = ctx.project_id;

        match method {
            "get" => {
                let key = args.str(0, "key")?;
                Ok(self
                    .partitions
                    .get(project)
                    .and_then(|p| p.get(key).cloned())
                    .unwrap_or(Value::Null))
            }
            "set" => {
                let key = args.str(0, "key")?;
                self.set(project, key, args.value(1).clone(), &args)
            }
            "delete" => {
                let key = args.str(0, "key")?;
                let removed = self
                    .partitions
                    .get_mut(project)
                    .map(|mut p| p.remove(key).is_some())
                    .unwrap_or(false);
                Ok(Value::Bool(removed))
            }
            "keys" => {
                let keys = self
                    .partitions
                    .get(project)
                    .map(|p| p.keys().cloned().map(Value::String).collect())
                    .unwrap_or_default();
                Ok(Value::Array(keys))
            }
            "clear" => {
                let removed = self
                    .partitions
                    .get_mut(project)
                    .map(|mut p| {
                        let n = p.len();
                        p.clear();
                        n
                    })
                    .unwrap_or(0);
                Ok(Value::from(removed))
            }
            _ => Err(args.unknown_method()),
        }
    }

    fn shutdown(&self) {
        self.partitions.clear();
    }
}
