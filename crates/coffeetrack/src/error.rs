use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoffeetrackError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Processing error: {0}")]
    Processing(#[from] ProcessingError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Invalid processing method '{id}': {reason}")]
    InvalidMethod { id: String, reason: String },
}

/// Errors raised while building a stage catalog.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Processing method '{0}' has no stages")]
    Empty(String),

    #[error("Processing method '{method_id}' has non-contiguous stage order: expected {expected}, found {found}")]
    NonContiguous {
        method_id: String,
        expected: u32,
        found: u32,
    },

    #[error("Processing method '{method_id}' repeats stage id '{stage_id}'")]
    DuplicateStage { method_id: String, stage_id: String },
}

/// Failures of the batch/progress/evaluation operations.
///
/// Every variant except `Database` is raised before any write happens.
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("Batch '{batch_id}' is {status}: {reason}")]
    InvalidState {
        batch_id: String,
        status: String,
        reason: String,
    },

    #[error("Stale step for batch '{batch_id}': request targets step {requested} (revision {requested_revision}), current is step {current} (revision {current_revision})")]
    StaleStep {
        batch_id: String,
        requested: u32,
        requested_revision: u64,
        current: u32,
        current_revision: u64,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Ordering violation for batch '{batch_id}': step {step_index} is not admissible after step {latest}")]
    OrderingViolation {
        batch_id: String,
        step_index: u32,
        latest: u32,
    },

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

impl ProcessingError {
    pub(crate) fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// True for failures the caller should answer by refreshing its view of
    /// the batch rather than resubmitting the same request.
    pub fn needs_refresh(&self) -> bool {
        matches!(
            self,
            Self::StaleStep { .. } | Self::InvalidState { .. } | Self::OrderingViolation { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, CoffeetrackError>;
