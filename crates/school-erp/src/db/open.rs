use super::migrations::apply_migrations;
use super::DbResult;
use crate::config::DatabaseConfig;
use rusqlite::Connection;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Opens the database described by the configuration.
pub fn open_database(config: &DatabaseConfig) -> DbResult<Connection> {
    match config {
        DatabaseConfig::InMemory => open_db_in_memory(),
        DatabaseConfig::File(path) => open_db(path),
    }
}

/// Opens a SQLite database file and applies all pending migrations.
pub fn open_db(path: impl AsRef<Path>) -> DbResult<Connection> {
    let path = path.as_ref();
    bootstrap("file", || Connection::open(path))
}

/// Opens an in-memory SQLite database and applies all pending migrations.
pub fn open_db_in_memory() -> DbResult<Connection> {
    bootstrap("memory", Connection::open_in_memory)
}

fn bootstrap(
    mode: &'static str,
    connect: impl FnOnce() -> rusqlite::Result<Connection>,
) -> DbResult<Connection> {
    let started_at = Instant::now();
    info!(mode, "opening database");

    let mut conn = match connect() {
        Ok(conn) => conn,
        Err(err) => {
            error!(
                mode,
                duration_ms = started_at.elapsed().as_millis() as u64,
                error = %err,
                "database open failed"
            );
            return Err(err.into());
        }
    };

    match configure(&mut conn) {
        Ok(()) => {
            info!(
                mode,
                duration_ms = started_at.elapsed().as_millis() as u64,
                "database ready"
            );
            Ok(conn)
        }
        Err(err) => {
            error!(
                mode,
                duration_ms = started_at.elapsed().as_millis() as u64,
                error = %err,
                "database bootstrap failed"
            );
            Err(err)
        }
    }
}

fn configure(conn: &mut Connection) -> DbResult<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_secs(5))?;
    apply_migrations(conn)?;
    Ok(())
}
