//! SQLite connection management.
//!
//! Provides connection pools for the knowledge store and the token log with
//! WAL mode enabled. Foreign keys are switched on so the schema-level
//! `ON DELETE CASCADE` backs up the explicit two-step document delete.
//! The database file and its parent directories are created automatically.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

use crate::error::Result;

/// Create a connection pool to a SQLite database file.
///
/// - Creates the database file and parent directories if they don't exist.
/// - Enables WAL journal mode and foreign-key enforcement.
/// - Returns a pool with up to 5 connections.
pub async fn connect(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}
