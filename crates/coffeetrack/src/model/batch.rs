use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a processing batch.
///
/// Always derived from the progress log and the evaluation history; see
/// [`crate::state::derive_status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchStatus {
    NotStarted,
    InProgress,
    AwaitingEvaluation,
    Completed,
    /// An expert failed the batch at the given stage and no resubmission has
    /// been observed since.
    #[serde(rename_all = "camelCase")]
    Failed { order_index: u32, stage_name: String },
}

impl BatchStatus {
    /// Storage key for the status column.
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::NotStarted => "not_started",
            BatchStatus::InProgress => "in_progress",
            BatchStatus::AwaitingEvaluation => "awaiting_evaluation",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Completed)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, BatchStatus::Failed { .. })
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchStatus::NotStarted => write!(f, "not started"),
            BatchStatus::InProgress => write!(f, "in progress"),
            BatchStatus::AwaitingEvaluation => write!(f, "awaiting evaluation"),
            BatchStatus::Completed => write!(f, "completed"),
            BatchStatus::Failed {
                order_index,
                stage_name,
            } => write!(f, "failed at stage {} ({})", order_index, stage_name),
        }
    }
}

/// A unit of coffee moving through a processing method's stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingBatch {
    pub batch_id: String,
    /// Human-readable code shown to farmers and staff.
    pub batch_code: String,
    pub method_id: String,
    /// Last derived status. Rewritten after every append or evaluation.
    pub status: BatchStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
