//! Batch repository: CRUD operations for the `batches` table.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use super::{format_timestamp, timestamp_column, Database, DatabaseError};
use crate::model::{BatchStatus, ProcessingBatch};

fn batch_from_row(row: &Row<'_>) -> Result<ProcessingBatch, rusqlite::Error> {
    let id: String = row.get("id")?;
    let status: String = row.get("status")?;
    let failed_order_index: Option<u32> = row.get("failed_order_index")?;
    let failed_stage_name: Option<String> = row.get("failed_stage_name")?;

    Ok(ProcessingBatch {
        status: parse_status(&status, failed_order_index, failed_stage_name, &id),
        batch_id: id,
        batch_code: row.get("batch_code")?,
        method_id: row.get("method_id")?,
        created_at: timestamp_column(row, "created_at")?,
        updated_at: timestamp_column(row, "updated_at")?,
    })
}

fn parse_status(
    s: &str,
    failed_order_index: Option<u32>,
    failed_stage_name: Option<String>,
    batch_id: &str,
) -> BatchStatus {
    match s {
        "not_started" => BatchStatus::NotStarted,
        "in_progress" => BatchStatus::InProgress,
        "awaiting_evaluation" => BatchStatus::AwaitingEvaluation,
        "completed" => BatchStatus::Completed,
        "failed" => BatchStatus::Failed {
            order_index: failed_order_index.unwrap_or(0),
            stage_name: failed_stage_name.unwrap_or_default(),
        },
        other => {
            log::warn!(
                "Unknown batch status '{}' for batch {}, defaulting to NotStarted",
                other,
                batch_id
            );
            BatchStatus::NotStarted
        }
    }
}

fn failed_columns(status: &BatchStatus) -> (Option<u32>, Option<&str>) {
    match status {
        BatchStatus::Failed {
            order_index,
            stage_name,
        } => (Some(*order_index), Some(stage_name.as_str())),
        _ => (None, None),
    }
}

/// Query filter parameters for batch listing.
#[derive(Debug, Default, Clone)]
pub struct BatchFilter {
    /// Status storage key, e.g. `"awaiting_evaluation"`.
    pub status: Option<String>,
    pub method_id: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Inserts a new batch row.
pub fn insert(db: &Database, batch: &ProcessingBatch) -> Result<(), DatabaseError> {
    let (failed_order_index, failed_stage_name) = failed_columns(&batch.status);
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO batches (id, batch_code, method_id, status, failed_order_index,
             failed_stage_name, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                batch.batch_id,
                batch.batch_code,
                batch.method_id,
                batch.status.as_str(),
                failed_order_index,
                failed_stage_name,
                format_timestamp(batch.created_at),
                format_timestamp(batch.updated_at),
            ],
        )?;
        Ok(())
    })
}

/// Finds a batch by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<ProcessingBatch>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM batches WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], batch_from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Finds a batch by its human-readable code.
pub fn find_by_code(db: &Database, code: &str) -> Result<Option<ProcessingBatch>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM batches WHERE batch_code = ?1")?;
        let mut rows = stmt.query_map(params![code], batch_from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Rewrites the cached status of a batch.
pub fn update_status(
    db: &Database,
    id: &str,
    status: &BatchStatus,
    updated_at: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    let (failed_order_index, failed_stage_name) = failed_columns(status);
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE batches SET status = ?2, failed_order_index = ?3, failed_stage_name = ?4,
             updated_at = ?5 WHERE id = ?1",
            params![
                id,
                status.as_str(),
                failed_order_index,
                failed_stage_name,
                format_timestamp(updated_at),
            ],
        )?;
        Ok(())
    })
}

/// Queries batches with filters, returning (rows, total_count).
pub fn query(
    db: &Database,
    filter: &BatchFilter,
) -> Result<(Vec<ProcessingBatch>, u64), DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(ref status) = filter.status {
            conditions.push(format!("status = ?{}", param_values.len() + 1));
            param_values.push(Box::new(status.clone()));
        }
        if let Some(ref method_id) = filter.method_id {
            conditions.push(format!("method_id = ?{}", param_values.len() + 1));
            param_values.push(Box::new(method_id.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM batches {}", where_clause);
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

        let limit = filter.limit.unwrap_or(100) as i64;
        let offset = filter.offset.unwrap_or(0) as i64;
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "SELECT * FROM batches {} ORDER BY created_at DESC, id LIMIT ?{} OFFSET ?{}",
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let rows: Vec<ProcessingBatch> = stmt
            .query_map(params_ref.as_slice(), batch_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })
}

/// Counts batches with the given status key.
pub fn count_by_status(db: &Database, status: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM batches WHERE status = ?1",
            params![status],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}
