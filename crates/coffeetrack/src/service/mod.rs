//! The write path for batches: creation, advancement and evaluation.
//!
//! Every mutation of a batch re-derives the status from storage first.
//! Within one service a per-batch lock serializes writers; across services
//! sharing a database file, appends only land if the log is still at the
//! snapshot the checks were made against.

mod locks;
mod request;

pub use request::{AdvanceRequest, BatchView};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info_span;

use crate::catalog::{self, StageCatalog};
use crate::codec;
use crate::config::Config;
use crate::db::batch_repo::{self, BatchFilter};
use crate::db::{evaluation_repo, stage_repo, Database};
use crate::error::{CoffeetrackError, ConfigError, ProcessingError};
use crate::events::{BatchEvent, BatchEventReporter, NoopReporter};
use crate::model::{
    BatchStatus, EntryKind, EvaluationRecord, EvaluationResult, FailureDetail, NewEvaluation,
    NewProgressEntry, ProcessingBatch, ProcessingStage, ProgressEntry,
};
use crate::progress_log::{ProgressLog, StepSnapshot};
use crate::reconcile::{
    self, ImplicatedStage, MatchConfidence, NotApplicableReason, RetryStatus, Verdict,
};
use crate::source::{BatchRecord, BatchSource};
use locks::BatchLocks;

/// Behaviour switches taken from the `evaluations` config section.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceSettings {
    /// Also append failure details to the comment in the legacy block format.
    pub mirror_failure_detail_in_comment: bool,
}

/// Where the next entry of a batch goes.
struct Target {
    stage_id: String,
    stage_name: String,
    step_index: u32,
    kind: EntryKind,
    resubmission_window: u32,
}

pub struct BatchService {
    db: Database,
    log: ProgressLog,
    catalog: StageCatalog,
    settings: ServiceSettings,
    reporter: Arc<dyn BatchEventReporter>,
    locks: BatchLocks,
}

impl BatchService {
    /// Creates a service over `db` and stores the catalog's stages there.
    pub fn new(db: Database, catalog: StageCatalog) -> Result<Self, CoffeetrackError> {
        for method_id in catalog.method_ids() {
            stage_repo::replace_method(&db, method_id, catalog.stages_for(method_id)?)?;
        }
        log::info!(
            "Stage catalog stored for methods: {}",
            catalog.method_ids().collect::<Vec<_>>().join(", ")
        );

        Ok(Self {
            log: ProgressLog::new(db.clone()),
            db,
            catalog,
            settings: ServiceSettings::default(),
            reporter: Arc::new(NoopReporter),
            locks: BatchLocks::new(),
        })
    }

    /// Builds the catalog and settings from `config` over an open database.
    pub fn with_config(db: Database, config: &Config) -> Result<Self, CoffeetrackError> {
        let catalog = StageCatalog::from_methods(&config.methods)?;
        let settings = ServiceSettings {
            mirror_failure_detail_in_comment: config.evaluations.mirror_failure_detail_in_comment,
        };
        Ok(Self::new(db, catalog)?.with_settings(settings))
    }

    /// Opens the configured database and builds the service from `config`.
    pub fn from_config(config: &Config) -> Result<Self, CoffeetrackError> {
        let path = config
            .resolved_database_path()
            .ok_or_else(|| ConfigError::Validation {
                message: "no database_path set and no home directory to default to".to_string(),
            })?;
        let db = Database::open(&path)?;
        Self::with_config(db, config)
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn BatchEventReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_settings(mut self, settings: ServiceSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn catalog(&self) -> &StageCatalog {
        &self.catalog
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn progress_log(&self) -> &ProgressLog {
        &self.log
    }

    /// Registers a new batch for a processing method.
    pub fn create_batch(
        &self,
        batch_code: &str,
        method_id: &str,
    ) -> Result<ProcessingBatch, ProcessingError> {
        let _span = info_span!("create_batch", batch_code, method_id).entered();

        let code = batch_code.trim();
        if code.is_empty() {
            return Err(ProcessingError::InvalidInput(
                "batch code must not be empty".to_string(),
            ));
        }
        self.catalog.stages_for(method_id)?;
        let duplicate =
            || ProcessingError::InvalidInput(format!("batch code '{}' is already in use", code));
        if batch_repo::find_by_code(&self.db, code)?.is_some() {
            return Err(duplicate());
        }

        let now = Utc::now();
        let batch = ProcessingBatch {
            batch_id: uuid::Uuid::new_v4().to_string(),
            batch_code: code.to_string(),
            method_id: method_id.to_string(),
            status: BatchStatus::NotStarted,
            created_at: now,
            updated_at: now,
        };
        match batch_repo::insert(&self.db, &batch) {
            Err(e) if e.is_unique_violation() => return Err(duplicate()),
            other => other?,
        }

        log::info!(
            "Created batch {} ({}) for method {}",
            batch.batch_id,
            batch.batch_code,
            method_id
        );
        self.reporter.report(BatchEvent::BatchCreated {
            batch_id: batch.batch_id.clone(),
            batch_code: batch.batch_code.clone(),
            method_id: batch.method_id.clone(),
            timestamp: now,
        });
        Ok(batch)
    }

    /// Records that a batch reached its next stage.
    ///
    /// A failed batch instead gets a resubmission of the failed stage at
    /// that stage's original step.
    pub fn advance_to_next(
        &self,
        batch_id: &str,
        request: &AdvanceRequest,
    ) -> Result<ProgressEntry, ProcessingError> {
        let _span = info_span!("advance_to_next", batch_id).entered();
        let lock = self.locks.lock_for(batch_id);
        let _guard = locks::acquire(&lock);

        let record = self.load(batch_id)?;
        let status = record.status();
        if status.is_terminal() {
            return Err(invalid_state(
                batch_id,
                &status,
                "a completed batch takes no further progress",
            ));
        }

        let current = record.snapshot();
        if request.snapshot != current {
            log::debug!(
                "Rejecting stale advance for batch {}: {:?} != {:?}",
                batch_id,
                request.snapshot,
                current
            );
            return Err(ProcessingError::StaleStep {
                batch_id: batch_id.to_string(),
                requested: request.snapshot.step_index,
                requested_revision: request.snapshot.revision,
                current: current.step_index,
                current_revision: current.revision,
            });
        }

        validate_advance(request)?;
        let target = next_target(&record, &status, request.progress_date)?;

        let entry = NewProgressEntry {
            stage_id: target.stage_id,
            stage_name: target.stage_name,
            step_index: target.step_index,
            kind: target.kind,
            progress_date: request.progress_date,
            output_quantity: request.output_quantity,
            output_unit: request.output_unit.trim().to_string(),
            recorded_by_user_id: request.recorded_by_user_id.trim().to_string(),
            media: request.media.clone(),
            parameters: request.parameters.clone(),
        };
        let stored = self
            .log
            .append_at(batch_id, current, &entry, target.resubmission_window)?;

        let new_status = self.finish_append(record, &status, &stored)?;
        log::info!(
            "Batch {} {} {} at step {} ({} -> {})",
            batch_id,
            match stored.kind {
                EntryKind::Advance => "advanced to",
                EntryKind::Resubmission => "resubmitted",
            },
            stored.stage_name,
            stored.step_index,
            status,
            new_status
        );
        self.reporter.report(BatchEvent::ProgressAppended {
            batch_id: batch_id.to_string(),
            progress_id: stored.progress_id.clone(),
            stage_name: stored.stage_name.clone(),
            step_index: stored.step_index,
            kind: stored.kind,
            status: new_status,
            timestamp: Utc::now(),
        });
        Ok(stored)
    }

    /// Records an expert verdict on a batch.
    pub fn record_evaluation(
        &self,
        batch_id: &str,
        evaluation: NewEvaluation,
    ) -> Result<EvaluationRecord, ProcessingError> {
        let _span = info_span!(
            "record_evaluation",
            batch_id,
            result = evaluation.result.as_str()
        )
        .entered();
        let lock = self.locks.lock_for(batch_id);
        let _guard = locks::acquire(&lock);

        let mut record = self.load(batch_id)?;
        let status = record.status();
        match (&status, evaluation.result) {
            (BatchStatus::NotStarted, _) => {
                return Err(invalid_state(batch_id, &status, "nothing to evaluate yet"));
            }
            (BatchStatus::Completed, _) => {
                return Err(invalid_state(
                    batch_id,
                    &status,
                    "a completed batch is not evaluated again",
                ));
            }
            (BatchStatus::AwaitingEvaluation, _) => {}
            (BatchStatus::Failed { .. }, EvaluationResult::Pass)
                if untimed_failure(&record) && record.reached_final_stage() => {}
            (_, EvaluationResult::Pass) => {
                return Err(invalid_state(
                    batch_id,
                    &status,
                    "a pass requires the final stage to be reached",
                ));
            }
            _ => {}
        }

        if let Some(detail) = &evaluation.failure_detail {
            let latest = record.latest_step_index();
            if detail.failed_order_index > latest {
                return Err(ProcessingError::InvalidInput(format!(
                    "failure names stage {} but the batch has only reached step {}",
                    detail.failed_order_index, latest
                )));
            }
        }
        let evaluation = self.prepare_evaluation(&record.stages, evaluation)?;
        let evaluation_id = uuid::Uuid::new_v4().to_string();
        let stored = evaluation_repo::insert(
            &self.db,
            &evaluation_id,
            batch_id,
            &evaluation,
            Utc::now(),
        )?;

        record.evaluations.push(stored.clone());
        let new_status = record.status();
        batch_repo::update_status(&self.db, batch_id, &new_status, Utc::now())?;

        log::info!(
            "Evaluation {} ({}) recorded for batch {} ({} -> {})",
            stored.evaluation_id,
            stored.result.as_str(),
            batch_id,
            status,
            new_status
        );
        self.reporter.report(BatchEvent::EvaluationRecorded {
            batch_id: batch_id.to_string(),
            evaluation_id: stored.evaluation_id.clone(),
            result: stored.result,
            status: new_status,
            timestamp: Utc::now(),
        });
        Ok(stored)
    }

    /// Whether the batch's open failure has been resubmitted. Read-only.
    pub fn reconcile(&self, batch_id: &str) -> Result<RetryStatus, ProcessingError> {
        let _span = info_span!("reconcile", batch_id).entered();
        let retry = self.load(batch_id)?.retry_status();
        if retry.is_low_confidence() {
            log::debug!("Batch {} retry status rests on a stage-name match", batch_id);
        }
        Ok(retry)
    }

    /// The batch's status as derived from storage right now.
    pub fn current_state(&self, batch_id: &str) -> Result<BatchStatus, ProcessingError> {
        Ok(self.load(batch_id)?.status())
    }

    /// The position a client should send back with its next advance.
    pub fn snapshot(&self, batch_id: &str) -> Result<StepSnapshot, ProcessingError> {
        self.db.get_batch(batch_id)?;
        self.log.snapshot(batch_id)
    }

    pub fn view(&self, batch_id: &str) -> Result<BatchView, ProcessingError> {
        let record = self.load(batch_id)?;
        let status = record.status();
        let mut batch = record.batch.clone();
        batch.status = status.clone();
        Ok(BatchView {
            status,
            snapshot: record.snapshot(),
            final_order_index: catalog::final_order_index(&record.stages),
            retry: record.retry_status(),
            batch,
        })
    }

    /// Lists batches by cached status and method, newest first.
    pub fn list_batches(
        &self,
        filter: &BatchFilter,
    ) -> Result<(Vec<ProcessingBatch>, u64), ProcessingError> {
        Ok(batch_repo::query(&self.db, filter)?)
    }

    /// Number of batches whose cached status has the same kind as `status`.
    pub fn count_batches(&self, status: &BatchStatus) -> Result<u64, ProcessingError> {
        Ok(batch_repo::count_by_status(&self.db, status.as_str())?)
    }

    /// Moves failure details out of legacy comments into their own column.
    pub fn backfill_failure_details(&self) -> Result<usize, ProcessingError> {
        let _span = info_span!("backfill_failure_details").entered();
        let updated = evaluation_repo::backfill_failure_details(&self.db)?;
        log::info!("Backfilled failure details on {} evaluation(s)", updated);
        Ok(updated)
    }

    fn load(&self, batch_id: &str) -> Result<BatchRecord, ProcessingError> {
        BatchRecord::load(&self.db, batch_id)
    }

    /// Re-derives status after an append, marks a resolved failure, and
    /// refreshes the cached status.
    fn finish_append(
        &self,
        mut record: BatchRecord,
        previous: &BatchStatus,
        stored: &ProgressEntry,
    ) -> Result<BatchStatus, ProcessingError> {
        let batch_id = record.batch.batch_id.clone();
        record.entries.push(stored.clone());
        let status = record.status();

        if previous.is_failed() {
            if let RetryStatus::Retried { evaluation_id, .. } = record.retry_status() {
                if evaluation_repo::mark_resolved(&self.db, &evaluation_id, &stored.progress_id)? {
                    log::info!(
                        "Evaluation {} resolved by resubmission {}",
                        evaluation_id,
                        stored.progress_id
                    );
                    self.reporter.report(BatchEvent::FailureResolved {
                        batch_id: batch_id.clone(),
                        evaluation_id,
                        progress_id: stored.progress_id.clone(),
                        timestamp: Utc::now(),
                    });
                }
            }
        }

        batch_repo::update_status(&self.db, &batch_id, &status, Utc::now())?;
        Ok(status)
    }

    fn prepare_evaluation(
        &self,
        stages: &[ProcessingStage],
        mut evaluation: NewEvaluation,
    ) -> Result<NewEvaluation, ProcessingError> {
        if evaluation.evaluated_by_user_id.trim().is_empty() {
            return Err(ProcessingError::InvalidInput(
                "evaluator must be identified".to_string(),
            ));
        }

        match (evaluation.result, evaluation.failure_detail.take()) {
            (EvaluationResult::Fail, Some(detail)) => {
                evaluation.failure_detail = Some(complete_failure_detail(stages, detail)?);
            }
            (result, Some(_)) => {
                return Err(ProcessingError::InvalidInput(format!(
                    "a {} evaluation cannot carry a failure detail",
                    result.as_str()
                )));
            }
            (_, None) => {}
        }

        if self.settings.mirror_failure_detail_in_comment {
            if let Some(detail) = &evaluation.failure_detail {
                evaluation.comment = codec::attach(&evaluation.comment, detail);
            }
        }
        Ok(evaluation)
    }
}

fn invalid_state(batch_id: &str, status: &BatchStatus, reason: &str) -> ProcessingError {
    ProcessingError::InvalidState {
        batch_id: batch_id.to_string(),
        status: status.to_string(),
        reason: reason.to_string(),
    }
}

fn validate_advance(request: &AdvanceRequest) -> Result<(), ProcessingError> {
    if !request.output_quantity.is_finite() || request.output_quantity <= 0.0 {
        return Err(ProcessingError::InvalidInput(format!(
            "output quantity must be a positive number, got {}",
            request.output_quantity
        )));
    }
    if request.output_unit.trim().is_empty() {
        return Err(ProcessingError::InvalidInput(
            "output unit must not be empty".to_string(),
        ));
    }
    if request.recorded_by_user_id.trim().is_empty() {
        return Err(ProcessingError::InvalidInput(
            "recording user must be identified".to_string(),
        ));
    }
    Ok(())
}

fn next_target(
    record: &BatchRecord,
    status: &BatchStatus,
    progress_date: DateTime<Utc>,
) -> Result<Target, ProcessingError> {
    let batch_id = record.batch.batch_id.as_str();
    let latest = record.latest_step_index();

    match status {
        BatchStatus::AwaitingEvaluation => Err(invalid_state(
            batch_id,
            status,
            "the final stage is waiting for an evaluation",
        )),
        BatchStatus::Failed { order_index, .. } => {
            resubmission_target(record, status, *order_index, progress_date)
        }
        _ => {
            let next = latest + 1;
            let stage = catalog::stage_at(&record.stages, next).ok_or_else(|| {
                invalid_state(batch_id, status, &format!("no stage follows step {}", latest))
            })?;
            Ok(Target {
                stage_id: stage.stage_id.clone(),
                stage_name: stage.name.clone(),
                step_index: next,
                kind: EntryKind::Advance,
                resubmission_window: 0,
            })
        }
    }
}

/// The open failure carries no evaluation time, so resubmissions cannot
/// be ordered after it.
fn untimed_failure(record: &BatchRecord) -> bool {
    matches!(
        record.retry_status(),
        RetryStatus::NotApplicable {
            reason: NotApplicableReason::MissingEvaluationTime,
            ..
        }
    )
}

fn resubmission_target(
    record: &BatchRecord,
    status: &BatchStatus,
    order_index: u32,
    progress_date: DateTime<Utc>,
) -> Result<Target, ProcessingError> {
    let batch_id = record.batch.batch_id.as_str();
    let latest = record.latest_step_index();

    if let Some(Verdict::Fail(evaluation, _)) = reconcile::latest_verdict(&record.evaluations) {
        let Some(evaluated_at) = evaluation.evaluated_at else {
            return Err(invalid_state(
                batch_id,
                status,
                "the failed evaluation has no time, so no resubmission can resolve it",
            ));
        };
        if progress_date <= evaluated_at {
            return Err(ProcessingError::InvalidInput(format!(
                "a resubmission must be dated after the failed evaluation ({})",
                evaluated_at
            )));
        }
    }

    let stage = match record.retry_status() {
        RetryStatus::Pending { stage, .. } => stage,
        _ => {
            let known = catalog::stage_at(&record.stages, order_index).ok_or_else(|| {
                invalid_state(batch_id, status, "the failed stage is not part of this method")
            })?;
            ImplicatedStage {
                order_index,
                stage_name: known.name.clone(),
                stage_id: Some(known.stage_id.clone()),
                confidence: MatchConfidence::Catalog,
            }
        }
    };

    let original = record
        .entries
        .iter()
        .filter(|e| stage.matches(e))
        .min_by_key(|e| (e.progress_date, e.sequence));
    let step_index = original.map(|e| e.step_index).unwrap_or(order_index);
    if step_index > latest {
        return Err(invalid_state(
            batch_id,
            status,
            "the failed stage has not been reached yet",
        ));
    }

    let stage_id = original
        .map(|e| e.stage_id.clone())
        .or(stage.stage_id)
        .ok_or_else(|| invalid_state(batch_id, status, "the failed stage has no identifier"))?;
    let stage_name = original
        .map(|e| e.stage_name.clone())
        .unwrap_or(stage.stage_name);

    Ok(Target {
        stage_id,
        stage_name,
        step_index,
        kind: EntryKind::Resubmission,
        resubmission_window: latest - step_index,
    })
}

/// Checks a new failure detail against the catalog and fills in the stage
/// id and, if missing, the stage name.
fn complete_failure_detail(
    stages: &[ProcessingStage],
    mut detail: FailureDetail,
) -> Result<FailureDetail, ProcessingError> {
    let stage = catalog::stage_at(stages, detail.failed_order_index).ok_or_else(|| {
        ProcessingError::InvalidInput(format!(
            "failure names stage {} which this method does not have",
            detail.failed_order_index
        ))
    })?;

    if let Some(stage_id) = detail.stage_id.as_deref() {
        if stage_id != stage.stage_id {
            return Err(ProcessingError::InvalidInput(format!(
                "failure stage id '{}' does not match stage {} ('{}')",
                stage_id, stage.order_index, stage.stage_id
            )));
        }
    }

    let name = detail.stage_name.trim();
    if name.is_empty() {
        detail.stage_name = stage.name.clone();
    } else if !name.eq_ignore_ascii_case(stage.name.trim()) {
        return Err(ProcessingError::InvalidInput(format!(
            "failure stage name '{}' does not match stage {} ('{}')",
            name, stage.order_index, stage.name
        )));
    }

    detail.stage_id = Some(stage.stage_id.clone());
    Ok(detail)
}
