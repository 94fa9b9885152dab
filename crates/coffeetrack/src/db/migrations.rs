//! Versioned schema migrations for the batch store.
//!
//! Applied versions are recorded in `_migrations`. Each pending migration
//! runs in its own transaction together with its bookkeeping row, so a
//! failed step leaves the store at the previous version.

use rusqlite::Connection;

use super::error::DatabaseError;

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
    kind: MigrationKind,
}

enum MigrationKind {
    Standard,
    /// Skipped when the column is already there.
    AddColumn {
        table: &'static str,
        column: &'static str,
    },
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_batches_table",
        sql: include_str!("sql/001_create_batches.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 2,
        description: "create_processing_stages_table",
        sql: include_str!("sql/002_create_processing_stages.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 3,
        description: "create_progress_entries_table",
        sql: include_str!("sql/003_create_progress_entries.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 4,
        description: "create_evaluations_table",
        sql: include_str!("sql/004_create_evaluations.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 5,
        description: "add_failure_detail_to_evaluations",
        sql: include_str!("sql/005_add_failure_detail.sql"),
        kind: MigrationKind::AddColumn {
            table: "evaluations",
            column: "failure_detail",
        },
    },
    Migration {
        version: 6,
        description: "add_resolved_by_to_evaluations",
        sql: include_str!("sql/006_add_resolved_by.sql"),
        kind: MigrationKind::AddColumn {
            table: "evaluations",
            column: "resolved_by_progress_id",
        },
    },
    Migration {
        version: 7,
        description: "add_revision_to_progress_entries",
        sql: include_str!("sql/007_add_progress_revision.sql"),
        kind: MigrationKind::Standard,
    },
];

/// Brings the schema up to the latest version.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let applied: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > applied) {
        apply(conn, migration)?;
    }
    Ok(())
}

fn apply(conn: &Connection, migration: &Migration) -> Result<(), DatabaseError> {
    let failed = |e: rusqlite::Error| DatabaseError::Migration {
        version: migration.version,
        reason: e.to_string(),
    };

    let tx = conn.unchecked_transaction()?;
    let needed = match migration.kind {
        MigrationKind::Standard => true,
        MigrationKind::AddColumn { table, column } => !has_column(&tx, table, column)?,
    };
    if needed {
        log::info!(
            "Applying schema v{} ({})",
            migration.version,
            migration.description
        );
        tx.execute_batch(migration.sql).map_err(failed)?;
    } else {
        log::debug!("Schema v{} already in place", migration.version);
    }
    tx.execute(
        "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
        rusqlite::params![migration.version, migration.description],
    )
    .map_err(failed)?;
    tx.commit().map_err(failed)
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool, DatabaseError> {
    if !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(DatabaseError::Migration {
            version: 0,
            reason: format!("Invalid table name: {}", table),
        });
    }
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let mut names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    Ok(names.any(|name| name.is_ok_and(|n| n == column)))
}
