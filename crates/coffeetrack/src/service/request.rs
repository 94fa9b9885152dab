use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{BatchStatus, MediaRefs, ProcessingBatch, ProgressParameter};
use crate::progress_log::StepSnapshot;
use crate::reconcile::RetryStatus;

/// A farmer's report that a batch moved on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvanceRequest {
    /// The position the farmer saw when filling in the report.
    pub snapshot: StepSnapshot,
    pub progress_date: DateTime<Utc>,
    pub output_quantity: f64,
    pub output_unit: String,
    pub recorded_by_user_id: String,
    #[serde(default)]
    pub media: MediaRefs,
    #[serde(default)]
    pub parameters: Vec<ProgressParameter>,
}

impl AdvanceRequest {
    pub fn new(
        snapshot: StepSnapshot,
        progress_date: DateTime<Utc>,
        output_quantity: f64,
        output_unit: &str,
        recorded_by_user_id: &str,
    ) -> Self {
        Self {
            snapshot,
            progress_date,
            output_quantity,
            output_unit: output_unit.to_string(),
            recorded_by_user_id: recorded_by_user_id.to_string(),
            media: MediaRefs::default(),
            parameters: Vec::new(),
        }
    }

    pub fn with_media(mut self, media: MediaRefs) -> Self {
        self.media = media;
        self
    }

    pub fn with_parameter(mut self, parameter: ProgressParameter) -> Self {
        self.parameters.push(parameter);
        self
    }
}

/// Everything a client needs to render one batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchView {
    pub batch: ProcessingBatch,
    pub status: BatchStatus,
    pub snapshot: StepSnapshot,
    pub final_order_index: u32,
    pub retry: RetryStatus,
}
