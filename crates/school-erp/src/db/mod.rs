//! SQLite storage bootstrap and schema migrations.
//!
//! Connections handed out by this module have foreign keys enabled and every migration
//! applied. Nothing reads or writes school data before that holds.

pub mod migrations;
mod open;

pub use open::{open_database, open_db, open_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error("database schema version {db_version} is newer than supported {latest_supported}")]
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    #[error("schema bootstrap did not create table `{table}`")]
    MissingTable { table: &'static str },
}
