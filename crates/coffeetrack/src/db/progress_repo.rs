//! Progress entry repository: insert-only access to `progress_entries`.
//!
//! No update or delete exists here; table triggers reject both.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row, Transaction, TransactionBehavior};

use super::{conversion_error, format_timestamp, timestamp_column, Database, DatabaseError};
use crate::model::{EntryKind, MediaRefs, NewProgressEntry, ProgressEntry, ProgressParameter};

fn entry_from_row(row: &Row<'_>) -> Result<ProgressEntry, rusqlite::Error> {
    let kind: String = row.get("kind")?;
    let kind = match kind.as_str() {
        "resubmission" => EntryKind::Resubmission,
        "advance" => EntryKind::Advance,
        other => {
            log::warn!("Unknown progress entry kind '{}', treating as advance", other);
            EntryKind::Advance
        }
    };
    let parameters: Option<String> = row.get("parameters")?;
    let parameters: Vec<ProgressParameter> = match parameters {
        Some(json) => {
            serde_json::from_str(&json).map_err(|e| conversion_error(row, "parameters", e))?
        }
        None => Vec::new(),
    };

    Ok(ProgressEntry {
        progress_id: row.get("id")?,
        batch_id: row.get("batch_id")?,
        stage_id: row.get("stage_id")?,
        stage_name: row.get("stage_name")?,
        step_index: row.get("step_index")?,
        kind,
        progress_date: timestamp_column(row, "progress_date")?,
        output_quantity: row.get("output_quantity")?,
        output_unit: row.get("output_unit")?,
        recorded_by_user_id: row.get("recorded_by")?,
        media: MediaRefs {
            photo_url: row.get("photo_url")?,
            video_url: row.get("video_url")?,
        },
        parameters,
        sequence: row.get("seq")?,
    })
}

/// What a guarded insert did.
#[derive(Debug, Clone, PartialEq)]
pub enum Insert {
    Stored(ProgressEntry),
    /// The log was no longer where the caller last saw it.
    Moved { step_index: u32, revision: u64 },
    /// The entry's step is not admissible after `latest`.
    Rejected { latest: u32 },
}

/// Inserts a new entry if the batch's log is still at `expected`
/// (`(max step, entry count)`, or anywhere when `None`) and `admissible`
/// accepts the current max step.
///
/// The position read, both checks and the insert run in one
/// `BEGIN IMMEDIATE` transaction, so writers on other connections to the
/// same file are serialized too. Each entry records the log revision it
/// creates; `UNIQUE(batch_id, revision)` backs the check in storage.
pub fn insert<F>(
    db: &Database,
    progress_id: &str,
    batch_id: &str,
    entry: &NewProgressEntry,
    expected: Option<(u32, u64)>,
    admissible: F,
    created_at: DateTime<Utc>,
) -> Result<Insert, DatabaseError>
where
    F: FnOnce(u32) -> bool,
{
    let parameters = if entry.parameters.is_empty() {
        None
    } else {
        Some(
            serde_json::to_string(&entry.parameters).map_err(|e| DatabaseError::Encode {
                column: "parameters",
                source: e,
            })?,
        )
    };

    db.with_conn(|conn| {
        let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
        let (latest, revision) = position_in(&tx, batch_id)?;
        if expected.is_some_and(|at| at != (latest, revision)) {
            return Ok(Insert::Moved {
                step_index: latest,
                revision,
            });
        }
        if !admissible(latest) {
            return Ok(Insert::Rejected { latest });
        }

        tx.execute(
            "INSERT INTO progress_entries (id, batch_id, stage_id, stage_name, step_index, kind,
             progress_date, output_quantity, output_unit, recorded_by, photo_url, video_url,
             parameters, created_at, revision)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                progress_id,
                batch_id,
                entry.stage_id,
                entry.stage_name,
                entry.step_index,
                entry.kind.as_str(),
                format_timestamp(entry.progress_date),
                entry.output_quantity,
                entry.output_unit,
                entry.recorded_by_user_id,
                entry.media.photo_url,
                entry.media.video_url,
                parameters,
                format_timestamp(created_at),
                revision + 1,
            ],
        )?;
        let sequence = tx.last_insert_rowid();
        let stored = tx.query_row(
            "SELECT * FROM progress_entries WHERE seq = ?1",
            params![sequence],
            entry_from_row,
        )?;
        tx.commit()?;
        Ok(Insert::Stored(stored))
    })
}

/// Finds an entry by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<ProgressEntry>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM progress_entries WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], entry_from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// All entries of a batch in insertion order.
pub fn list_for_batch(db: &Database, batch_id: &str) -> Result<Vec<ProgressEntry>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM progress_entries WHERE batch_id = ?1 ORDER BY seq")?;
        let rows = stmt
            .query_map(params![batch_id], entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Entries of one stage ordered by progress date, then insertion.
pub fn list_for_stage(
    db: &Database,
    batch_id: &str,
    stage_id: &str,
) -> Result<Vec<ProgressEntry>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM progress_entries WHERE batch_id = ?1 AND stage_id = ?2
             ORDER BY progress_date, seq",
        )?;
        let rows = stmt
            .query_map(params![batch_id, stage_id], entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Highest step recorded for the batch and the number of entries.
pub fn position(db: &Database, batch_id: &str) -> Result<(u32, u64), DatabaseError> {
    db.with_conn(|conn| position_in(conn, batch_id))
}

fn position_in(conn: &Connection, batch_id: &str) -> Result<(u32, u64), DatabaseError> {
    let position = conn.query_row(
        "SELECT COALESCE(MAX(step_index), 0), COUNT(*) FROM progress_entries
         WHERE batch_id = ?1",
        params![batch_id],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;
    Ok(position)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::batch_repo;
    use crate::model::{BatchStatus, ProcessingBatch};
    use chrono::TimeZone;

    fn test_db() -> Database {
        let db = Database::open_in_memory().expect("Failed to create test database");
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        batch_repo::insert(
            &db,
            &ProcessingBatch {
                batch_id: "b1".to_string(),
                batch_code: "B-1".to_string(),
                method_id: "washed".to_string(),
                status: BatchStatus::NotStarted,
                created_at: at,
                updated_at: at,
            },
        )
        .unwrap();
        db
    }

    fn put(db: &Database, id: &str, entry: &NewProgressEntry) -> ProgressEntry {
        match insert(db, id, "b1", entry, None, |_| true, Utc::now()).unwrap() {
            Insert::Stored(stored) => stored,
            other => panic!("expected a stored entry, got {other:?}"),
        }
    }

    fn new_entry(stage: &str, step: u32, day: u32) -> NewProgressEntry {
        NewProgressEntry {
            stage_id: stage.to_lowercase(),
            stage_name: stage.to_string(),
            step_index: step,
            kind: EntryKind::Advance,
            progress_date: Utc.with_ymd_and_hms(2024, 1, day, 9, 0, 0).unwrap(),
            output_quantity: 120.5,
            output_unit: "kg".to_string(),
            recorded_by_user_id: "farmer-1".to_string(),
            media: MediaRefs::default(),
            parameters: Vec::new(),
        }
    }

    #[test]
    fn test_insert_returns_stored_entry() {
        let db = test_db();
        let mut entry = new_entry("Drying", 1, 2);
        entry.media.photo_url = Some("https://cdn.example/p.jpg".to_string());
        entry.parameters.push(ProgressParameter {
            name: "moisture".to_string(),
            value: "11.5".to_string(),
            unit: Some("%".to_string()),
            recorded_at: entry.progress_date,
        });

        let stored = put(&db, "p1", &entry);
        assert_eq!(stored.progress_id, "p1");
        assert_eq!(stored.step_index, 1);
        assert_eq!(stored.progress_date, entry.progress_date);
        assert_eq!(stored.media, entry.media);
        assert_eq!(stored.parameters, entry.parameters);
        assert!(stored.sequence > 0);

        assert_eq!(find_by_id(&db, "p1").unwrap(), Some(stored));
    }

    #[test]
    fn test_insert_unknown_batch_fails() {
        let db = test_db();
        let entry = new_entry("Drying", 1, 2);
        assert!(insert(&db, "p1", "missing", &entry, None, |_| true, Utc::now()).is_err());
    }

    #[test]
    fn test_position() {
        let db = test_db();
        assert_eq!(position(&db, "b1").unwrap(), (0, 0));

        put(&db, "p1", &new_entry("Drying", 1, 2));
        put(&db, "p2", &new_entry("Hulling", 2, 3));
        let mut redo = new_entry("Drying", 1, 4);
        redo.kind = EntryKind::Resubmission;
        put(&db, "p3", &redo);

        assert_eq!(position(&db, "b1").unwrap(), (2, 3));
    }

    #[test]
    fn test_insert_checks_expected_position() {
        let db = test_db();
        put(&db, "p1", &new_entry("Drying", 1, 2));

        let moved = insert(
            &db,
            "p2",
            "b1",
            &new_entry("Hulling", 2, 3),
            Some((0, 0)),
            |_| true,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(
            moved,
            Insert::Moved {
                step_index: 1,
                revision: 1
            }
        );

        let rejected = insert(
            &db,
            "p2",
            "b1",
            &new_entry("Grading", 3, 3),
            Some((1, 1)),
            |latest| latest + 1 == 3,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(rejected, Insert::Rejected { latest: 1 });
        assert_eq!(position(&db, "b1").unwrap(), (1, 1));

        let stored = insert(
            &db,
            "p2",
            "b1",
            &new_entry("Hulling", 2, 3),
            Some((1, 1)),
            |latest| latest + 1 == 2,
            Utc::now(),
        )
        .unwrap();
        assert!(matches!(stored, Insert::Stored(ref e) if e.progress_id == "p2"));
        assert_eq!(position(&db, "b1").unwrap(), (2, 2));
    }

    #[test]
    fn test_revision_written_per_batch() {
        let db = test_db();
        put(&db, "p1", &new_entry("Drying", 1, 2));
        let mut redo = new_entry("Drying", 1, 3);
        redo.kind = EntryKind::Resubmission;
        put(&db, "p2", &redo);

        let revisions: Vec<u64> = db
            .with_conn(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT revision FROM progress_entries WHERE batch_id = 'b1' ORDER BY seq",
                )?;
                let rows = stmt
                    .query_map([], |r| r.get(0))?
                    .collect::<Result<Vec<u64>, _>>()?;
                Ok(rows)
            })
            .unwrap();
        assert_eq!(revisions, vec![1, 2]);
    }

    #[test]
    fn test_list_for_stage_orders_by_date() {
        let db = test_db();
        let mut late = new_entry("Drying", 1, 9);
        late.kind = EntryKind::Resubmission;
        put(&db, "p-late", &late);
        put(&db, "p-early", &new_entry("Drying", 1, 2));
        put(&db, "p-other", &new_entry("Hulling", 2, 3));

        let ids: Vec<_> = list_for_stage(&db, "b1", "drying")
            .unwrap()
            .into_iter()
            .map(|e| e.progress_id)
            .collect();
        assert_eq!(ids, vec!["p-early", "p-late"]);

        let ids: Vec<_> = list_for_batch(&db, "b1")
            .unwrap()
            .into_iter()
            .map(|e| e.progress_id)
            .collect();
        assert_eq!(ids, vec!["p-late", "p-early", "p-other"]);
    }
}
