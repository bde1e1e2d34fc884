//! Code bundles handed to a script context at start.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The code a project runs, resolved from its running source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeBundle {
    /// Running-source text (`release:1.2.0`, `debug:main`) used in logs and stats.
    pub label: String,
    /// JavaScript entry source.
    pub source: String,
    /// Modules the project declares as required.
    #[serde(default)]
    pub requires: Vec<String>,
    /// Exposed to the script as `service.config`.
    #[serde(default = "empty_config")]
    pub config: Value,
}

fn empty_config() -> Value {
    Value::Object(Default::default())
}

impl CodeBundle {
    pub fn new(label: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            source: source.into(),
            requires: Vec::new(),
            config: empty_config(),
        }
    }

    pub fn require(mut self, module: impl Into<String>) -> Self {
        self.requires.push(module.into());
        self
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }
}
