//! Native Module Contract
//!
//! Every capability a script can reach through `modules.<name>` is provided by
//! a type implementing [`NativeModule`]. Modules are process-wide singletons
//! shared by all Script Contexts, so every call and every bind/unbind carries
//! the calling project's ID. A module that keeps state must partition it by
//! that ID; nothing else keeps tenants apart.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ModuleError, ModuleResult};
use crate::schema::ModuleSchema;

/// Configuration table handed to [`NativeModule::init`].
pub type ModuleConfig = serde_json::Map<String, Value>;

/// Identity and human metadata of a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInfo {
    /// Unique registration key, also the script namespace
    pub name: String,
    pub version: semver::Version,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

impl ModuleInfo {
    pub fn new(name: impl Into<String>, version: semver::Version) -> Self {
        Self {
            name: name.into(),
            version,
            description: None,
            author: None,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }
}

/// Per-call context.
#[derive(Debug, Clone, Copy)]
pub struct CallContext<'a> {
    pub project_id: &'a str,
}

/// The contract every module implements.
///
/// Methods are synchronous: they run on the calling Script Context's thread
/// while the script waits for the result.
pub trait NativeModule: Send + Sync + 'static {
    /// Name, version and metadata. Must be stable for the module's lifetime.
    fn info(&self) -> ModuleInfo;

    /// Callable surface. Must be stable for the module's lifetime.
    fn schema(&self) -> ModuleSchema;

    /// One-time initialization, before any context binds the module.
    fn init(&self, config: &ModuleConfig) -> ModuleResult<()>;

    /// Called once when a project's context binds this module.
    fn bind(&self, _project_id: &str) -> ModuleResult<()> {
        Ok(())
    }

    /// Called when a project's context is torn down or its start is rolled back.
    fn unbind(&self, _project_id: &str) {}

    /// Invoke the method at dotted `method` path.
    fn call(&self, ctx: &CallContext<'_>, method: &str, args: Vec<Value>) -> ModuleResult<Value>;

    /// Called once at process teardown if `init` succeeded.
    fn shutdown(&self) {}
}

/// Positional argument access with uniform error reporting.
pub struct Args<'a> {
    module: &'a str,
    method: &'a str,
    values: &'a [Value],
}

impl<'a> Args<'a> {
    pub fn new(module: &'a str, method: &'a str, values: &'a [Value]) -> Self {
        Self {
            module,
            method,
            values,
        }
    }

    /// Argument at `index`, `Null` if absent.
    pub fn value(&self, index: usize) -> &'a Value {
        self.values.get(index).unwrap_or(&Value::Null)
    }

    pub fn str(&self, index: usize, name: &str) -> ModuleResult<&'a str> {
        self.value(index)
            .as_str()
            .ok_or_else(|| self.error(format!("argument {} must be a string", name)))
    }

    pub fn error(&self, reason: impl Into<String>) -> ModuleError {
        ModuleError::Call {
            module: self.module.to_string(),
            method: self.method.to_string(),
            reason: reason.into(),
        }
    }

    pub fn unknown_method(&self) -> ModuleError {
        ModuleError::MethodNotFound {
            module: self.module.to_string(),
            method: self.method.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_args_access() {
        let values = vec![json!("k"), json!(3)];
        let args = Args::new("kv", "get", &values);

        assert_eq!(args.str(0, "key").unwrap(), "k");
        assert_eq!(args.value(5), &Value::Null);

        let err = args.str(1, "key").unwrap_err();
        assert_eq!(err.to_string(), "kv.get: argument key must be a string");
    }

    #[test]
    fn test_info_serializes_version_as_string() {
        let info = ModuleInfo::new("kv", semver::Version::new(1, 2, 0)).describe("store");
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["version"], "1.2.0");
        assert!(json.get("author").is_none());
    }
}
