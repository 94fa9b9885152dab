use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An expert's verdict on a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationResult {
    Pass,
    Fail,
    NeedsImprovement,
    Temporary,
    Pending,
}

impl EvaluationResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationResult::Pass => "pass",
            EvaluationResult::Fail => "fail",
            EvaluationResult::NeedsImprovement => "needs_improvement",
            EvaluationResult::Temporary => "temporary",
            EvaluationResult::Pending => "pending",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pass" => Some(EvaluationResult::Pass),
            "fail" => Some(EvaluationResult::Fail),
            "needs_improvement" => Some(EvaluationResult::NeedsImprovement),
            "temporary" => Some(EvaluationResult::Temporary),
            "pending" => Some(EvaluationResult::Pending),
            _ => None,
        }
    }
}

/// The stage an expert failed, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureDetail {
    /// Primary correlation key with the batch's stages (1-based).
    pub failed_order_index: u32,
    pub stage_name: String,
    /// Missing on records written before stage ids were tracked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_id: Option<String>,
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub recommendations: String,
}

impl FailureDetail {
    pub fn new(failed_order_index: u32, stage_name: &str, details: &str) -> Self {
        Self {
            failed_order_index,
            stage_name: stage_name.to_string(),
            stage_id: None,
            details: details.to_string(),
            recommendations: String::new(),
        }
    }

    pub fn with_stage_id(mut self, stage_id: &str) -> Self {
        self.stage_id = Some(stage_id.to_string());
        self
    }

    pub fn with_recommendations(mut self, recommendations: &str) -> Self {
        self.recommendations = recommendations.to_string();
        self
    }

    /// A detail is usable when it names a real position and a stage.
    pub fn is_well_formed(&self) -> bool {
        self.failed_order_index >= 1 && !self.stage_name.trim().is_empty()
    }
}

/// An immutable expert evaluation of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationRecord {
    pub evaluation_id: String,
    pub batch_id: String,
    pub result: EvaluationResult,
    /// Missing on some historical records.
    pub evaluated_at: Option<DateTime<Utc>>,
    pub evaluated_by_user_id: String,
    #[serde(default)]
    pub comment: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_detail: Option<FailureDetail>,
    /// Set once, by the first progress entry observed to retry this failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_by_progress_id: Option<String>,
    pub sequence: i64,
}

impl EvaluationRecord {
    /// The structured failure detail, falling back to the legacy encoding in
    /// the comment for records that predate the dedicated field.
    pub fn effective_failure_detail(&self) -> Option<FailureDetail> {
        if self.result != EvaluationResult::Fail {
            return None;
        }
        match &self.failure_detail {
            Some(detail) if detail.is_well_formed() => Some(detail.clone()),
            _ => crate::codec::decode(&self.comment),
        }
    }

    /// Comment text with the failure detail appended in the legacy block
    /// format, for consumers that only read the comment field.
    pub fn legacy_comment(&self) -> String {
        match &self.failure_detail {
            Some(detail) => crate::codec::attach(&self.comment, detail),
            None => self.comment.clone(),
        }
    }
}

/// Input for recording a new evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvaluation {
    pub result: EvaluationResult,
    pub evaluated_at: DateTime<Utc>,
    pub evaluated_by_user_id: String,
    pub comment: String,
    pub failure_detail: Option<FailureDetail>,
}
