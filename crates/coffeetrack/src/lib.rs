pub mod catalog;
pub mod codec;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod model;
pub mod progress_log;
pub mod reconcile;
pub mod service;
pub mod source;
pub mod state;
pub mod telemetry;

pub use catalog::StageCatalog;
pub use config::{load_config, load_config_from_str, Config};
pub use db::batch_repo::BatchFilter;
pub use db::{Database, DatabaseError};
pub use error::{CatalogError, CoffeetrackError, ConfigError, ProcessingError, Result};
pub use events::{BatchEvent, BatchEventReporter, BroadcastReporter, NoopReporter};
pub use model::{
    BatchStatus, EntryKind, EvaluationRecord, EvaluationResult, FailureDetail, MediaRefs,
    NewEvaluation, ProcessingBatch, ProcessingStage, ProgressEntry, ProgressParameter,
};
pub use progress_log::{ProgressLog, StepSnapshot};
pub use reconcile::{MatchConfidence, NotApplicableReason, RetryStatus};
pub use service::{AdvanceRequest, BatchService, BatchView, ServiceSettings};
pub use source::{BatchRecord, BatchSource};
pub use state::derive_status;
pub use telemetry::{init_logging, LogFormat};
