use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    /// SQLite file; defaults to `~/.coffeetrack/data/coffeetrack.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<String>,
    #[serde(default)]
    pub methods: Vec<MethodConfig>,
    #[serde(default)]
    pub evaluations: EvaluationsConfig,
}

impl Config {
    /// Resolved database location, if one can be determined.
    pub fn resolved_database_path(&self) -> Option<PathBuf> {
        match &self.database_path {
            Some(path) => Some(PathBuf::from(path)),
            None => crate::db::default_database_path(),
        }
    }
}

/// A processing method (washed, natural, honey, ...) and its stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodConfig {
    pub id: String,
    pub name: String,
    pub stages: Vec<StageConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    pub id: String,
    pub name: String,
    pub order_index: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvaluationsConfig {
    /// Also write the failure detail into the comment in the legacy block
    /// format, for readers that predate the structured field.
    #[serde(default)]
    pub mirror_failure_detail_in_comment: bool,
}
