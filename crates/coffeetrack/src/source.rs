//! Read access to everything a batch's status is derived from.

use crate::catalog;
use crate::db::{batch_repo, evaluation_repo, progress_repo, stage_repo, Database};
use crate::error::ProcessingError;
use crate::model::{BatchStatus, EvaluationRecord, ProcessingBatch, ProcessingStage, ProgressEntry};
use crate::progress_log::StepSnapshot;
use crate::reconcile::{self, RetryStatus};
use crate::state;

/// Where batches, their logs and their evaluations are read from.
pub trait BatchSource {
    fn get_batch(&self, batch_id: &str) -> Result<ProcessingBatch, ProcessingError>;

    /// Entries in insertion order.
    fn get_progress_entries(&self, batch_id: &str) -> Result<Vec<ProgressEntry>, ProcessingError>;

    /// Evaluations in insertion order.
    fn get_evaluations(&self, batch_id: &str) -> Result<Vec<EvaluationRecord>, ProcessingError>;

    /// Ordered stages of a method. `NotFound` when the method has none.
    fn get_stage_catalog(&self, method_id: &str) -> Result<Vec<ProcessingStage>, ProcessingError>;
}

impl BatchSource for Database {
    fn get_batch(&self, batch_id: &str) -> Result<ProcessingBatch, ProcessingError> {
        batch_repo::find_by_id(self, batch_id)?
            .ok_or_else(|| ProcessingError::not_found("Batch", batch_id))
    }

    fn get_progress_entries(&self, batch_id: &str) -> Result<Vec<ProgressEntry>, ProcessingError> {
        Ok(progress_repo::list_for_batch(self, batch_id)?)
    }

    fn get_evaluations(&self, batch_id: &str) -> Result<Vec<EvaluationRecord>, ProcessingError> {
        Ok(evaluation_repo::list_for_batch(self, batch_id)?)
    }

    fn get_stage_catalog(&self, method_id: &str) -> Result<Vec<ProcessingStage>, ProcessingError> {
        let stages = stage_repo::stages_for(self, method_id)?;
        if stages.is_empty() {
            return Err(ProcessingError::not_found("Processing method", method_id));
        }
        Ok(stages)
    }
}

/// One consistent read of a batch and its inputs.
#[derive(Debug, Clone)]
pub struct BatchRecord {
    pub batch: ProcessingBatch,
    pub stages: Vec<ProcessingStage>,
    pub entries: Vec<ProgressEntry>,
    pub evaluations: Vec<EvaluationRecord>,
}

impl BatchRecord {
    pub fn load<S: BatchSource + ?Sized>(
        source: &S,
        batch_id: &str,
    ) -> Result<Self, ProcessingError> {
        let batch = source.get_batch(batch_id)?;
        let stages = source.get_stage_catalog(&batch.method_id)?;
        let entries = source.get_progress_entries(batch_id)?;
        let evaluations = source.get_evaluations(batch_id)?;
        Ok(Self {
            batch,
            stages,
            entries,
            evaluations,
        })
    }

    pub fn status(&self) -> BatchStatus {
        state::derive_status(&self.stages, &self.entries, &self.evaluations)
    }

    pub fn retry_status(&self) -> RetryStatus {
        reconcile::reconcile(&self.stages, &self.entries, &self.evaluations)
    }

    pub fn snapshot(&self) -> StepSnapshot {
        StepSnapshot {
            step_index: self.latest_step_index(),
            revision: self.entries.len() as u64,
        }
    }

    pub fn latest_step_index(&self) -> u32 {
        self.entries.iter().map(|e| e.step_index).max().unwrap_or(0)
    }

    /// Whether the log has reached the method's last stage.
    pub fn reached_final_stage(&self) -> bool {
        let last = catalog::final_order_index(&self.stages);
        last > 0 && self.latest_step_index() >= last
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntryKind, EvaluationResult, FailureDetail, MediaRefs};
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;

    /// A source backed by plain maps, standing in for a remote store.
    #[derive(Default)]
    struct MemorySource {
        batches: HashMap<String, ProcessingBatch>,
        entries: HashMap<String, Vec<ProgressEntry>>,
        evaluations: HashMap<String, Vec<EvaluationRecord>>,
        stages: HashMap<String, Vec<ProcessingStage>>,
    }

    impl BatchSource for MemorySource {
        fn get_batch(&self, batch_id: &str) -> Result<ProcessingBatch, ProcessingError> {
            self.batches
                .get(batch_id)
                .cloned()
                .ok_or_else(|| ProcessingError::not_found("Batch", batch_id))
        }

        fn get_progress_entries(
            &self,
            batch_id: &str,
        ) -> Result<Vec<ProgressEntry>, ProcessingError> {
            Ok(self.entries.get(batch_id).cloned().unwrap_or_default())
        }

        fn get_evaluations(
            &self,
            batch_id: &str,
        ) -> Result<Vec<EvaluationRecord>, ProcessingError> {
            Ok(self.evaluations.get(batch_id).cloned().unwrap_or_default())
        }

        fn get_stage_catalog(
            &self,
            method_id: &str,
        ) -> Result<Vec<ProcessingStage>, ProcessingError> {
            self.stages
                .get(method_id)
                .cloned()
                .ok_or_else(|| ProcessingError::not_found("Processing method", method_id))
        }
    }

    fn memory_source() -> MemorySource {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut source = MemorySource::default();
        source.batches.insert(
            "b1".to_string(),
            ProcessingBatch {
                batch_id: "b1".to_string(),
                batch_code: "B-1".to_string(),
                method_id: "natural".to_string(),
                status: BatchStatus::NotStarted,
                created_at: at,
                updated_at: at,
            },
        );
        source.stages.insert(
            "natural".to_string(),
            vec![
                ProcessingStage::new("sun", "natural", "Sun drying", 1),
                ProcessingStage::new("hull", "natural", "Hulling", 2),
            ],
        );
        source
    }

    fn entry(seq: i64, stage_id: &str, name: &str, step: u32, day: u32) -> ProgressEntry {
        ProgressEntry {
            progress_id: format!("p{}", seq),
            batch_id: "b1".to_string(),
            stage_id: stage_id.to_string(),
            stage_name: name.to_string(),
            step_index: step,
            kind: EntryKind::Advance,
            progress_date: Utc.with_ymd_and_hms(2024, 1, day, 10, 0, 0).unwrap(),
            output_quantity: 80.0,
            output_unit: "kg".to_string(),
            recorded_by_user_id: "farmer".to_string(),
            media: MediaRefs::default(),
            parameters: Vec::new(),
            sequence: seq,
        }
    }

    #[test]
    fn test_record_from_custom_source() {
        let mut source = memory_source();
        source.entries.insert(
            "b1".to_string(),
            vec![entry(1, "sun", "Sun drying", 1, 3), entry(2, "hull", "Hulling", 2, 5)],
        );

        let record = BatchRecord::load(&source, "b1").unwrap();
        assert_eq!(record.status(), BatchStatus::AwaitingEvaluation);
        assert_eq!(
            record.snapshot(),
            StepSnapshot {
                step_index: 2,
                revision: 2
            }
        );
        assert!(!record.retry_status().is_applicable());
    }

    #[test]
    fn test_record_sees_failure() {
        let mut source = memory_source();
        source.entries.insert(
            "b1".to_string(),
            vec![entry(1, "sun", "Sun drying", 1, 3), entry(2, "hull", "Hulling", 2, 5)],
        );
        source.evaluations.insert(
            "b1".to_string(),
            vec![EvaluationRecord {
                evaluation_id: "e1".to_string(),
                batch_id: "b1".to_string(),
                result: EvaluationResult::Fail,
                evaluated_at: Some(Utc.with_ymd_and_hms(2024, 1, 6, 0, 0, 0).unwrap()),
                evaluated_by_user_id: "expert".to_string(),
                comment: String::new(),
                failure_detail: Some(FailureDetail::new(1, "Sun drying", "mould")),
                resolved_by_progress_id: None,
                sequence: 1,
            }],
        );

        let record = BatchRecord::load(&source, "b1").unwrap();
        assert!(record.status().is_failed());
        assert!(matches!(record.retry_status(), RetryStatus::Pending { .. }));
    }

    #[test]
    fn test_missing_batch() {
        let source = memory_source();
        let err = BatchRecord::load(&source, "nope").unwrap_err();
        assert!(matches!(err, ProcessingError::NotFound { kind: "Batch", .. }));
    }

    #[test]
    fn test_database_source_requires_stored_catalog() {
        let db = Database::open_in_memory().unwrap();
        let err = db.get_stage_catalog("washed").unwrap_err();
        assert!(matches!(err, ProcessingError::NotFound { .. }));

        stage_repo::replace_method(
            &db,
            "washed",
            &[ProcessingStage::new("drying", "washed", "Drying", 1)],
        )
        .unwrap();
        assert_eq!(db.get_stage_catalog("washed").unwrap().len(), 1);
        assert!(matches!(
            db.get_batch("missing"),
            Err(ProcessingError::NotFound { .. })
        ));
    }
}
