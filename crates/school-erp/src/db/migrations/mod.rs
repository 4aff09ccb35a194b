//! Ordered schema migrations tracked through `PRAGMA user_version`.

use crate::db::{DbError, DbResult};
use rusqlite::{Connection, Transaction};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy)]
struct Migration {
    version: u32,
    /// Columns added ahead of `sql`; each is skipped when the table already has it.
    added_columns: &'static [AddedColumn],
    sql: &'static str,
}

#[derive(Debug, Clone, Copy)]
struct AddedColumn {
    table: &'static str,
    column: &'static str,
    definition: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        added_columns: &[],
        sql: include_str!("0001_school_core.sql"),
    },
    Migration {
        version: 2,
        added_columns: &[
            AddedColumn {
                table: "academic_years",
                column: "status",
                definition: "TEXT NOT NULL DEFAULT 'open' \
                    CHECK (status IN ('open', 'closed', 'graduates_archived', 'promoted'))",
            },
            AddedColumn {
                table: "students",
                column: "graduated_in",
                definition: "INTEGER REFERENCES academic_years (id)",
            },
        ],
        sql: include_str!("0002_academic_year_lifecycle.sql"),
    },
];

/// Tables every migrated database must contain.
pub const CORE_TABLES: &[&str] = &[
    "grades",
    "students",
    "academic_years",
    "exam_scores",
    "report_cards",
];

/// Returns the latest migration version known by this binary.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |migration| migration.version)
}

/// Applies all pending migrations on the provided connection.
///
/// A version marker without all of the tables behind it (a database wiped by hand, or
/// restored from a partial dump) is replayed from version 0. Every migration tolerates
/// the tables, columns and indexes that survived.
pub fn apply_migrations(conn: &mut Connection) -> DbResult<()> {
    let mut current_version = current_user_version(conn)?;
    let latest = latest_version();

    if current_version > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: current_version,
            latest_supported: latest,
        });
    }

    if current_version > 0 {
        if let Some(missing) = first_missing_table(conn)? {
            warn!(
                recorded_version = current_version,
                missing_table = missing,
                "schema version recorded but core tables are missing; re-running migrations"
            );
            conn.execute_batch("PRAGMA user_version = 0;")?;
            current_version = 0;
        }
    }

    if current_version == latest {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for migration in MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }

        for added in migration.added_columns {
            add_column_if_missing(&tx, added)?;
        }
        tx.execute_batch(migration.sql)?;
        tx.execute_batch(&format!("PRAGMA user_version = {};", migration.version))?;
        info!(version = migration.version, "applied schema migration");
    }
    tx.commit()?;

    match first_missing_table(conn)? {
        Some(table) => Err(DbError::MissingTable { table }),
        None => Ok(()),
    }
}

/// Reads the applied schema version.
pub fn current_user_version(conn: &Connection) -> DbResult<u32> {
    let version = conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?;
    Ok(version)
}

fn first_missing_table(conn: &Connection) -> DbResult<Option<&'static str>> {
    for table in CORE_TABLES {
        if !table_exists(conn, table)? {
            return Ok(Some(*table));
        }
    }
    Ok(None)
}

fn add_column_if_missing(tx: &Transaction<'_>, added: &AddedColumn) -> DbResult<()> {
    let present: bool = tx.query_row(
        "SELECT EXISTS(SELECT 1 FROM pragma_table_info(?1) WHERE name = ?2);",
        [added.table, added.column],
        |row| row.get(0),
    )?;
    if !present {
        tx.execute_batch(&format!(
            "ALTER TABLE {} ADD COLUMN {} {};",
            added.table, added.column, added.definition
        ))?;
    }
    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> DbResult<bool> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1);",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists)
}
