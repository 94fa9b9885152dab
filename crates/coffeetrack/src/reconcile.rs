//! Retry reconciliation: has a failed stage been resubmitted since the
//! evaluation that failed it?
//!
//! Neither the log nor the evaluation stores the answer. It is recomputed
//! from both on every call, so a resubmission made after a caller's last
//! read is always seen. Timestamps decide, not step indexes: a
//! resubmission usually repeats the failed attempt's step.

use serde::Serialize;

use crate::catalog;
use crate::model::{EvaluationRecord, EvaluationResult, FailureDetail, ProcessingStage, ProgressEntry};

/// How the failed stage was matched to progress entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchConfidence {
    /// The failure named a stage id.
    StageId,
    /// Matched by position among the stage names seen in the batch's own
    /// history. Can misattribute when two stages share a name.
    Positional,
    /// Matched against the catalog stage at the failed position, because
    /// the history did not reach that far.
    Catalog,
}

/// The stage a failure points at, as resolved against this batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImplicatedStage {
    pub order_index: u32,
    pub stage_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_id: Option<String>,
    pub confidence: MatchConfidence,
}

impl ImplicatedStage {
    /// Whether a progress entry belongs to this stage.
    pub fn matches(&self, entry: &ProgressEntry) -> bool {
        match (self.confidence, &self.stage_id) {
            (MatchConfidence::StageId, Some(id)) => &entry.stage_id == id,
            _ => same_name(&entry.stage_name, &self.stage_name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotApplicableReason {
    /// No Fail evaluation with a usable failure detail.
    NoFailedEvaluation,
    /// The latest failure has since been overruled by a Pass.
    SupersededByPass,
    /// The failed evaluation has no timestamp to compare against.
    MissingEvaluationTime,
    /// The failed position matches neither the history nor the catalog.
    UnknownStage,
}

/// Outcome of [`reconcile`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RetryStatus {
    #[serde(rename_all = "camelCase")]
    NotApplicable {
        reason: NotApplicableReason,
        #[serde(skip_serializing_if = "Option::is_none")]
        evaluation_id: Option<String>,
    },
    /// The stage is still waiting for the farmer's correction.
    #[serde(rename_all = "camelCase")]
    Pending {
        evaluation_id: String,
        failure: FailureDetail,
        stage: ImplicatedStage,
    },
    /// The stage was resubmitted and awaits re-evaluation.
    #[serde(rename_all = "camelCase")]
    Retried {
        evaluation_id: String,
        failure: FailureDetail,
        stage: ImplicatedStage,
        latest_entry: ProgressEntry,
    },
}

impl RetryStatus {
    pub fn retried(&self) -> bool {
        matches!(self, RetryStatus::Retried { .. })
    }

    pub fn latest_entry(&self) -> Option<&ProgressEntry> {
        match self {
            RetryStatus::Retried { latest_entry, .. } => Some(latest_entry),
            _ => None,
        }
    }

    pub fn is_applicable(&self) -> bool {
        !matches!(self, RetryStatus::NotApplicable { .. })
    }

    /// True when the stage match relied on names rather than a stage id.
    pub fn is_low_confidence(&self) -> bool {
        match self {
            RetryStatus::Pending { stage, .. } | RetryStatus::Retried { stage, .. } => {
                stage.confidence != MatchConfidence::StageId
            }
            RetryStatus::NotApplicable { .. } => false,
        }
    }

    fn not_applicable(reason: NotApplicableReason, evaluation_id: Option<&str>) -> Self {
        RetryStatus::NotApplicable {
            reason,
            evaluation_id: evaluation_id.map(str::to_string),
        }
    }
}

/// A batch's latest decisive verdict.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict<'a> {
    Pass(&'a EvaluationRecord),
    Fail(&'a EvaluationRecord, FailureDetail),
}

/// Latest Pass, or Fail with a usable failure detail, by insertion order.
/// Other results, and Fails that name no stage, do not decide anything.
pub fn latest_verdict(evaluations: &[EvaluationRecord]) -> Option<Verdict<'_>> {
    let mut ordered: Vec<&EvaluationRecord> = evaluations.iter().collect();
    ordered.sort_by_key(|e| e.sequence);

    ordered.into_iter().rev().find_map(|ev| match ev.result {
        EvaluationResult::Pass => Some(Verdict::Pass(ev)),
        EvaluationResult::Fail => ev
            .effective_failure_detail()
            .map(|detail| Verdict::Fail(ev, detail)),
        _ => None,
    })
}

/// Determines whether the batch's most recent open failure has been retried.
///
/// Pure and idempotent over its inputs; the order of `entries` and
/// `evaluations` does not matter.
pub fn reconcile(
    stages: &[ProcessingStage],
    entries: &[ProgressEntry],
    evaluations: &[EvaluationRecord],
) -> RetryStatus {
    let (evaluation, failure) = match latest_verdict(evaluations) {
        Some(Verdict::Fail(ev, detail)) => (ev, detail),
        Some(Verdict::Pass(ev)) => {
            let failed_before = evaluations.iter().any(|e| {
                e.sequence < ev.sequence && e.effective_failure_detail().is_some()
            });
            let reason = if failed_before {
                NotApplicableReason::SupersededByPass
            } else {
                NotApplicableReason::NoFailedEvaluation
            };
            return RetryStatus::not_applicable(reason, None);
        }
        None => return RetryStatus::not_applicable(NotApplicableReason::NoFailedEvaluation, None),
    };

    let Some(evaluated_at) = evaluation.evaluated_at else {
        log::warn!(
            "Failed evaluation {} has no timestamp; retry status unknown",
            evaluation.evaluation_id
        );
        return RetryStatus::not_applicable(
            NotApplicableReason::MissingEvaluationTime,
            Some(&evaluation.evaluation_id),
        );
    };

    let Some(stage) = resolve_stage(&failure, stages, entries) else {
        log::warn!(
            "Failed evaluation {} points at stage {} ({}) which this batch does not have",
            evaluation.evaluation_id,
            failure.failed_order_index,
            failure.stage_name
        );
        return RetryStatus::not_applicable(
            NotApplicableReason::UnknownStage,
            Some(&evaluation.evaluation_id),
        );
    };

    let latest_retry = entries
        .iter()
        .filter(|e| stage.matches(e) && e.progress_date > evaluated_at)
        .max_by_key(|e| (e.progress_date, e.sequence));

    match latest_retry {
        Some(entry) => RetryStatus::Retried {
            evaluation_id: evaluation.evaluation_id.clone(),
            failure,
            stage,
            latest_entry: entry.clone(),
        },
        None => RetryStatus::Pending {
            evaluation_id: evaluation.evaluation_id.clone(),
            failure,
            stage,
        },
    }
}

/// Distinct stage names in order of first appearance in the history.
fn observed_stage_order(entries: &[ProgressEntry]) -> Vec<&ProgressEntry> {
    let mut ordered: Vec<&ProgressEntry> = entries.iter().collect();
    ordered.sort_by_key(|e| (e.progress_date, e.sequence));

    let mut firsts: Vec<&ProgressEntry> = Vec::new();
    for entry in ordered {
        if !firsts.iter().any(|f| same_name(&f.stage_name, &entry.stage_name)) {
            firsts.push(entry);
        }
    }
    firsts
}

fn resolve_stage(
    failure: &FailureDetail,
    stages: &[ProcessingStage],
    entries: &[ProgressEntry],
) -> Option<ImplicatedStage> {
    let order_index = failure.failed_order_index;

    if let Some(stage_id) = failure.stage_id.as_deref().filter(|id| !id.is_empty()) {
        let name = stages
            .iter()
            .find(|s| s.stage_id == stage_id)
            .map(|s| s.name.clone())
            .or_else(|| {
                entries
                    .iter()
                    .find(|e| e.stage_id == stage_id)
                    .map(|e| e.stage_name.clone())
            });
        if let Some(stage_name) = name {
            return Some(ImplicatedStage {
                order_index,
                stage_name,
                stage_id: Some(stage_id.to_string()),
                confidence: MatchConfidence::StageId,
            });
        }
        log::debug!(
            "Stage id '{}' is unknown, falling back to position {}",
            stage_id,
            order_index
        );
    }

    let observed = observed_stage_order(entries);
    let position = (order_index as usize).checked_sub(1);
    if let Some(first) = position.and_then(|i| observed.get(i)) {
        return Some(ImplicatedStage {
            order_index,
            stage_name: first.stage_name.clone(),
            stage_id: Some(first.stage_id.clone()),
            confidence: MatchConfidence::Positional,
        });
    }

    catalog::stage_at(stages, order_index).map(|s| ImplicatedStage {
        order_index,
        stage_name: s.name.clone(),
        stage_id: Some(s.stage_id.clone()),
        confidence: MatchConfidence::Catalog,
    })
}

fn same_name(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}
