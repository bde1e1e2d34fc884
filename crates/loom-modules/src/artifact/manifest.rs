//! Artifact manifest (`module.toml`)

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ModuleError, ModuleResult};
use crate::module::ModuleInfo;
use crate::schema::ModuleSchema;

/// File name looked up inside an artifact directory.
pub const MANIFEST_FILE: &str = "module.toml";

/// Parsed `module.toml`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub module: ModuleInfo,
    pub artifact: ArtifactCommand,
    pub schema: ModuleSchema,
}

/// How to launch the module process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactCommand {
    /// Executable, relative to the artifact directory unless absolute
    pub command: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    /// Seconds to wait for the process to report ready
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_secs: u64,
}

fn default_ready_timeout() -> u64 {
    10
}

impl ArtifactManifest {
    /// Read and parse the manifest inside `dir`.
    pub fn read(dir: &Path) -> ModuleResult<Self> {
        let path = dir.join(MANIFEST_FILE);
        let text = std::fs::read_to_string(&path).map_err(|e| ModuleError::Load {
            origin: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::parse(&text).map_err(|reason| ModuleError::Load {
            origin: path.display().to_string(),
            reason,
        })
    }

    pub fn parse(text: &str) -> Result<Self, String> {
        toml::from_str(text).map_err(|e| e.to_string())
    }

    /// Absolute path of the executable for an artifact rooted at `dir`.
    pub fn executable(&self, dir: &Path) -> PathBuf {
        if self.artifact.command.is_absolute() {
            self.artifact.command.clone()
        } else {
            dir.join(&self.artifact.command)
        }
    }
}
