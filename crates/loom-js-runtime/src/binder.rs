//! Module bindings for one context.
//!
//! Binding happens in two halves: [`Bindings::bind_all`] tells every module
//! about the project (rolled back on the first failure), then the prelude
//! builds the `modules.<name>` objects from each schema's method paths.
//! Calls from script land in [`ModuleDispatch`], which only forwards methods
//! the schema declares.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};

use serde_json::{Value, json};

use loom_modules::{BoundModule, CallContext};

use crate::error::RuntimeError;

/// Modules bound into a context. Dropping unbinds them in reverse order.
pub(crate) struct Bindings {
    project_id: String,
    bound: Vec<BoundModule>,
}

impl Bindings {
    pub(crate) fn bind_all(project_id: &str, modules: &[BoundModule]) -> Result<Self, RuntimeError> {
        let mut bindings = Self {
            project_id: project_id.to_string(),
            bound: Vec::with_capacity(modules.len()),
        };

        for module in modules {
            let outcome = catch_unwind(AssertUnwindSafe(|| module.module.bind(project_id)));
            let reason = match outcome {
                Ok(Ok(())) => {
                    bindings.bound.push(module.clone());
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => "bind panicked".to_string(),
            };
            // `bindings` drops here and unbinds what was already bound
            return Err(RuntimeError::ModuleBind {
                module: module.name.clone(),
                reason,
            });
        }

        Ok(bindings)
    }

    pub(crate) fn modules(&self) -> &[BoundModule] {
        &self.bound
    }
}

impl Drop for Bindings {
    fn drop(&mut self) {
        for module in self.bound.iter().rev() {
            if catch_unwind(AssertUnwindSafe(|| module.module.unbind(&self.project_id))).is_err() {
                tracing::warn!(module = %module.name, project = %self.project_id, "unbind panicked");
            }
        }
    }
}

/// Routes `modules.<name>.<path>(...)` calls to the native implementation.
pub(crate) struct ModuleDispatch {
    project_id: String,
    modules: HashMap<String, BoundModule>,
}

impl ModuleDispatch {
    pub(crate) fn new(project_id: &str, modules: &[BoundModule]) -> Self {
        Self {
            project_id: project_id.to_string(),
            modules: modules.iter().map(|m| (m.name.clone(), m.clone())).collect(),
        }
    }

    /// Returns a JSON envelope the prelude unwraps into a value or a throw.
    pub(crate) fn call(&self, module: &str, method: &str, args_json: &str) -> String {
        let result = self.dispatch(module, method, args_json);
        let envelope = match result {
            Ok(value) => json!({ "ok": true, "value": value }),
            Err(error) => json!({ "ok": false, "error": error }),
        };
        envelope.to_string()
    }

    fn dispatch(&self, module: &str, method: &str, args_json: &str) -> Result<Value, String> {
        let bound = self
            .modules
            .get(module)
            .ok_or_else(|| format!("module not bound: {}", module))?;
        if bound.schema.find_method(method).is_none() {
            return Err(format!("{}.{} is not part of the module schema", module, method));
        }

        let args: Vec<Value> = serde_json::from_str(args_json)
            .map_err(|e| format!("invalid arguments for {}.{}: {}", module, method, e))?;

        let ctx = CallContext {
            project_id: &self.project_id,
        };
        match catch_unwind(AssertUnwindSafe(|| bound.module.call(&ctx, method, args))) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => {
                tracing::error!(module = %module, method = %method, project = %self.project_id, "module call panicked");
                Err(format!("{}.{} panicked", module, method))
            }
        }
    }
}
