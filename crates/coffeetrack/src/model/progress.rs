use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How an entry entered the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Regular forward progress at `latest + 1`.
    Advance,
    /// Corrective resubmission of a failed stage at its original step.
    Resubmission,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Advance => "advance",
            EntryKind::Resubmission => "resubmission",
        }
    }
}

/// Optional media captured with a progress entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRefs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
}

/// One measured processing parameter, e.g. moisture 11.5 %.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressParameter {
    pub name: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// An immutable record that a stage occurred for a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEntry {
    pub progress_id: String,
    pub batch_id: String,
    pub stage_id: String,
    pub stage_name: String,
    pub step_index: u32,
    pub kind: EntryKind,
    pub progress_date: DateTime<Utc>,
    pub output_quantity: f64,
    pub output_unit: String,
    pub recorded_by_user_id: String,
    #[serde(default)]
    pub media: MediaRefs,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<ProgressParameter>,
    /// Storage-assigned insertion order. Breaks ties between equal dates.
    pub sequence: i64,
}

/// Input for [`crate::progress_log::ProgressLog::append`].
#[derive(Debug, Clone, PartialEq)]
pub struct NewProgressEntry {
    pub stage_id: String,
    pub stage_name: String,
    pub step_index: u32,
    pub kind: EntryKind,
    pub progress_date: DateTime<Utc>,
    pub output_quantity: f64,
    pub output_unit: String,
    pub recorded_by_user_id: String,
    pub media: MediaRefs,
    pub parameters: Vec<ProgressParameter>,
}
