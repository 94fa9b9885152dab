//! Domain records: stages, batches, progress entries and evaluations.

pub mod batch;
pub mod evaluation;
pub mod progress;
pub mod stage;

pub use batch::{BatchStatus, ProcessingBatch};
pub use evaluation::{EvaluationRecord, EvaluationResult, FailureDetail, NewEvaluation};
pub use progress::{EntryKind, MediaRefs, NewProgressEntry, ProgressEntry, ProgressParameter};
pub use stage::ProcessingStage;
