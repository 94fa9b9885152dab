//! The append-only progress log of each batch.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::db::progress_repo::{self, Insert};
use crate::db::Database;
use crate::error::ProcessingError;
use crate::model::{EntryKind, NewProgressEntry, ProgressEntry};

/// A caller's view of how far a batch's log had got.
///
/// `revision` counts entries, so it moves on every append, including
/// resubmissions that leave `step_index` unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepSnapshot {
    pub step_index: u32,
    pub revision: u64,
}

/// Read and append access to progress entries.
///
/// `append` and `append_at` are the only mutators. The ordering check runs
/// inside the insert's transaction.
#[derive(Clone)]
pub struct ProgressLog {
    db: Database,
}

impl ProgressLog {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Appends a new immutable entry.
    ///
    /// Forward entries must land exactly on `latest + 1`. Resubmissions may
    /// reuse an earlier step, at most `resubmission_window` steps back.
    pub fn append(
        &self,
        batch_id: &str,
        entry: &NewProgressEntry,
        resubmission_window: u32,
    ) -> Result<ProgressEntry, ProcessingError> {
        self.write(batch_id, None, entry, resubmission_window)
    }

    /// Like [`ProgressLog::append`], but only while the log is still at
    /// `expected`; otherwise fails with `StaleStep`. The check and the
    /// insert are one storage transaction, so this holds across processes
    /// sharing the database file.
    pub fn append_at(
        &self,
        batch_id: &str,
        expected: StepSnapshot,
        entry: &NewProgressEntry,
        resubmission_window: u32,
    ) -> Result<ProgressEntry, ProcessingError> {
        self.write(batch_id, Some(expected), entry, resubmission_window)
    }

    fn write(
        &self,
        batch_id: &str,
        expected: Option<StepSnapshot>,
        entry: &NewProgressEntry,
        resubmission_window: u32,
    ) -> Result<ProgressEntry, ProcessingError> {
        let admissible = |latest: u32| match entry.kind {
            EntryKind::Advance => entry.step_index == latest + 1,
            EntryKind::Resubmission => {
                entry.step_index >= 1
                    && entry.step_index <= latest
                    && entry.step_index + resubmission_window >= latest
            }
        };

        let progress_id = uuid::Uuid::new_v4().to_string();
        let outcome = progress_repo::insert(
            &self.db,
            &progress_id,
            batch_id,
            entry,
            expected.map(|s| (s.step_index, s.revision)),
            admissible,
            Utc::now(),
        )?;
        match outcome {
            Insert::Stored(stored) => {
                log::debug!(
                    "Appended {} entry {} for batch {} at step {}",
                    entry.kind.as_str(),
                    stored.progress_id,
                    batch_id,
                    stored.step_index
                );
                Ok(stored)
            }
            Insert::Moved {
                step_index,
                revision,
            } => {
                let requested = expected.unwrap_or(StepSnapshot {
                    step_index,
                    revision,
                });
                Err(ProcessingError::StaleStep {
                    batch_id: batch_id.to_string(),
                    requested: requested.step_index,
                    requested_revision: requested.revision,
                    current: step_index,
                    current_revision: revision,
                })
            }
            Insert::Rejected { latest } => Err(ProcessingError::OrderingViolation {
                batch_id: batch_id.to_string(),
                step_index: entry.step_index,
                latest,
            }),
        }
    }

    /// Highest step recorded for the batch, or 0 if none.
    pub fn latest_step_index(&self, batch_id: &str) -> Result<u32, ProcessingError> {
        Ok(self.snapshot(batch_id)?.step_index)
    }

    pub fn snapshot(&self, batch_id: &str) -> Result<StepSnapshot, ProcessingError> {
        let (step_index, revision) = progress_repo::position(&self.db, batch_id)?;
        Ok(StepSnapshot {
            step_index,
            revision,
        })
    }

    /// Full history in insertion order.
    pub fn entries(&self, batch_id: &str) -> Result<Vec<ProgressEntry>, ProcessingError> {
        Ok(progress_repo::list_for_batch(&self.db, batch_id)?)
    }

    /// History of one stage. Nothing is read until [`StageHistory::iter`].
    pub fn entries_for_stage<'a>(&'a self, batch_id: &str, stage_id: &str) -> StageHistory<'a> {
        StageHistory {
            log: self,
            batch_id: batch_id.to_string(),
            stage_id: stage_id.to_string(),
        }
    }
}

/// A restartable view over one stage's entries.
pub struct StageHistory<'a> {
    log: &'a ProgressLog,
    batch_id: String,
    stage_id: String,
}

impl StageHistory<'_> {
    /// Reads the stage's entries afresh, ordered by progress date then
    /// insertion. Each call reflects appends made since the previous one.
    pub fn iter(&self) -> Result<std::vec::IntoIter<ProgressEntry>, ProcessingError> {
        let entries = progress_repo::list_for_stage(&self.log.db, &self.batch_id, &self.stage_id)?;
        Ok(entries.into_iter())
    }
}
