//! Evaluation repository: expert verdicts in the `evaluations` table.
//!
//! Records are immutable except for two set-once columns:
//! `resolved_by_progress_id` and, for historical rows, `failure_detail`.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use super::{format_timestamp, optional_timestamp_column, Database, DatabaseError};
use crate::codec;
use crate::model::{EvaluationRecord, EvaluationResult, FailureDetail, NewEvaluation};

fn evaluation_from_row(row: &Row<'_>) -> Result<EvaluationRecord, rusqlite::Error> {
    let id: String = row.get("id")?;
    let result: String = row.get("result")?;
    let result = EvaluationResult::parse(&result).unwrap_or_else(|| {
        log::warn!(
            "Unknown evaluation result '{}' for evaluation {}, treating as pending",
            result,
            id
        );
        EvaluationResult::Pending
    });
    let failure_detail: Option<String> = row.get("failure_detail")?;
    let failure_detail = failure_detail.and_then(|json| {
        serde_json::from_str::<FailureDetail>(&json)
            .map_err(|e| {
                log::warn!("Unreadable failure detail on evaluation {}: {}", id, e);
            })
            .ok()
    });

    Ok(EvaluationRecord {
        evaluation_id: id,
        batch_id: row.get("batch_id")?,
        result,
        evaluated_at: optional_timestamp_column(row, "evaluated_at")?,
        evaluated_by_user_id: row.get("evaluated_by")?,
        comment: row.get("comment")?,
        failure_detail,
        resolved_by_progress_id: row.get("resolved_by_progress_id")?,
        sequence: row.get("seq")?,
    })
}

fn encode_detail(detail: Option<&FailureDetail>) -> Result<Option<String>, DatabaseError> {
    detail
        .map(|d| {
            serde_json::to_string(d).map_err(|e| DatabaseError::Encode {
                column: "failure_detail",
                source: e,
            })
        })
        .transpose()
}

/// Inserts a new evaluation and returns the stored record.
pub fn insert(
    db: &Database,
    evaluation_id: &str,
    batch_id: &str,
    evaluation: &NewEvaluation,
    created_at: DateTime<Utc>,
) -> Result<EvaluationRecord, DatabaseError> {
    let failure_detail = encode_detail(evaluation.failure_detail.as_ref())?;

    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO evaluations (id, batch_id, result, evaluated_at, evaluated_by, comment,
             failure_detail, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                evaluation_id,
                batch_id,
                evaluation.result.as_str(),
                format_timestamp(evaluation.evaluated_at),
                evaluation.evaluated_by_user_id,
                evaluation.comment,
                failure_detail,
                format_timestamp(created_at),
            ],
        )?;
        let sequence = conn.last_insert_rowid();

        let mut stmt = conn.prepare("SELECT * FROM evaluations WHERE seq = ?1")?;
        let stored = stmt.query_row(params![sequence], evaluation_from_row)?;
        Ok(stored)
    })
}

/// Finds an evaluation by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<EvaluationRecord>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM evaluations WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], evaluation_from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// All evaluations of a batch in insertion order.
pub fn list_for_batch(
    db: &Database,
    batch_id: &str,
) -> Result<Vec<EvaluationRecord>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM evaluations WHERE batch_id = ?1 ORDER BY seq")?;
        let rows = stmt
            .query_map(params![batch_id], evaluation_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Records the entry that resolved a failed evaluation.
///
/// Returns `false` if the evaluation was already resolved; the first
/// resolution is never overwritten.
pub fn mark_resolved(
    db: &Database,
    evaluation_id: &str,
    progress_id: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE evaluations SET resolved_by_progress_id = ?2
             WHERE id = ?1 AND resolved_by_progress_id IS NULL",
            params![evaluation_id, progress_id],
        )?;
        Ok(changed == 1)
    })
}

/// Copies failure details encoded in legacy comments into the structured
/// column. Rows that already have a detail, or whose comment holds none,
/// are left alone. Returns the number of rows updated.
pub fn backfill_failure_details(db: &Database) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;
        let candidates: Vec<(String, String)> = {
            let mut stmt = tx.prepare(
                "SELECT id, comment FROM evaluations
                 WHERE result = 'fail' AND failure_detail IS NULL ORDER BY seq",
            )?;
            let rows = stmt
                .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let mut updated = 0;
        for (id, comment) in candidates {
            let Some(detail) = codec::decode(&comment) else {
                continue;
            };
            let json = encode_detail(Some(&detail))?;
            updated += tx.execute(
                "UPDATE evaluations SET failure_detail = ?2
                 WHERE id = ?1 AND failure_detail IS NULL",
                params![id, json],
            )?;
        }
        tx.commit()?;
        Ok(updated)
    })
}
