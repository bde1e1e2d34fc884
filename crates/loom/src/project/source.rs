//! Running source and status of a project.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// What a running project was started from.
///
/// Textual forms: empty, `release:<version>`, `debug:<branch>`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(try_from = "String", into = "String")]
#[ts(export, type = "string")]
pub enum RunningSource {
    #[default]
    None,
    Release(String),
    Debug(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid running source {0:?}: expected \"\", \"release:<version>\" or \"debug:<branch>\"")]
pub struct RunningSourceError(pub String);

impl RunningSource {
    pub fn is_none(&self) -> bool {
        matches!(self, RunningSource::None)
    }
}

impl FromStr for RunningSource {
    type Err = RunningSourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(RunningSource::None);
        }
        let invalid = || RunningSourceError(s.to_string());
        let (kind, name) = s.split_once(':').ok_or_else(invalid)?;
        if name.is_empty() {
            return Err(invalid());
        }
        match kind {
            "release" => Ok(RunningSource::Release(name.to_string())),
            "debug" => Ok(RunningSource::Debug(name.to_string())),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for RunningSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunningSource::None => Ok(()),
            RunningSource::Release(version) => write!(f, "release:{}", version),
            RunningSource::Debug(branch) => write!(f, "debug:{}", branch),
        }
    }
}

impl TryFrom<String> for RunningSource {
    type Error = RunningSourceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RunningSource> for String {
    fn from(source: RunningSource) -> Self {
        source.to_string()
    }
}

/// Intended status as recorded in the project store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum ProjectStatus {
    Running,
    #[default]
    Stopped,
}
