//! Stage repository: persisted copy of the stage catalog.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};
use crate::model::ProcessingStage;

fn stage_from_row(row: &Row<'_>) -> Result<ProcessingStage, rusqlite::Error> {
    Ok(ProcessingStage {
        stage_id: row.get("id")?,
        method_id: row.get("method_id")?,
        name: row.get("name")?,
        order_index: row.get("order_index")?,
    })
}

/// Replaces all stages of a method in one transaction.
pub fn replace_method(
    db: &Database,
    method_id: &str,
    stages: &[ProcessingStage],
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM processing_stages WHERE method_id = ?1",
            params![method_id],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO processing_stages (id, method_id, name, order_index)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for stage in stages {
                stmt.execute(params![stage.stage_id, method_id, stage.name, stage.order_index])?;
            }
        }
        tx.commit()?;
        Ok(())
    })
}

/// Returns a method's stages ordered by position.
pub fn stages_for(db: &Database, method_id: &str) -> Result<Vec<ProcessingStage>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM processing_stages WHERE method_id = ?1 ORDER BY order_index",
        )?;
        let rows = stmt
            .query_map(params![method_id], stage_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
