//! Batch status derivation.
//!
//! Status is a function of the stage catalog, the progress log and the
//! evaluation history. The value stored on the batch row is a cache of
//! this function's last result and is never read back as an input.

use crate::catalog;
use crate::model::{BatchStatus, EvaluationRecord, ProcessingStage, ProgressEntry};
use crate::reconcile::{self, RetryStatus, Verdict};

/// Computes a batch's status.
///
/// - no entries: `NotStarted`
/// - latest decisive verdict is Pass: `Completed`
/// - latest decisive verdict is a Fail not yet retried: `Failed`
/// - otherwise `AwaitingEvaluation` once the final stage is reached, else
///   `InProgress`
pub fn derive_status(
    stages: &[ProcessingStage],
    entries: &[ProgressEntry],
    evaluations: &[EvaluationRecord],
) -> BatchStatus {
    if entries.is_empty() {
        return BatchStatus::NotStarted;
    }

    match reconcile::latest_verdict(evaluations) {
        Some(Verdict::Pass(_)) => return BatchStatus::Completed,
        Some(Verdict::Fail(_, failure)) => {
            // A timestamp-less failure cannot be shown to be retried.
            if !matches!(
                reconcile::reconcile(stages, entries, evaluations),
                RetryStatus::Retried { .. }
            ) {
                return BatchStatus::Failed {
                    order_index: failure.failed_order_index,
                    stage_name: failure.stage_name,
                };
            }
        }
        None => {}
    }

    let latest = entries.iter().map(|e| e.step_index).max().unwrap_or(0);
    let last_stage = catalog::final_order_index(stages);
    if last_stage > 0 && latest >= last_stage {
        BatchStatus::AwaitingEvaluation
    } else {
        BatchStatus::InProgress
    }
}
