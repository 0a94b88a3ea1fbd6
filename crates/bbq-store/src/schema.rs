//! Database schema and migrations.

use rusqlite::Connection;
use time::OffsetDateTime;

use crate::error::{Error, Result};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema.
pub fn initialize(conn: &Connection) -> Result<()> {
    let version = get_schema_version(conn)?;

    if version == 0 {
        create_schema_v1(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if version < SCHEMA_VERSION {
        migrate(conn, version)?;
    }

    Ok(())
}

/// Timestamps are stored as Unix milliseconds.
pub(crate) fn to_millis(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000_000) as i64
}

pub(crate) fn from_millis(millis: i64) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .map_err(|e| Error::InvalidTimestamp(format!("{millis}: {e}")))
}

fn get_schema_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='schema_version'",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version: i32 =
        conn.query_row("SELECT version FROM schema_version", [], |row| row.get(0))?;

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?)",
        [version],
    )?;
    Ok(())
}

fn create_schema_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL
        );

        -- One row per processed notification; NULL probe = disconnected
        CREATE TABLE IF NOT EXISTS measurements (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            captured_at INTEGER NOT NULL,
            probe1 INTEGER,
            probe2 INTEGER,
            probe3 INTEGER,
            probe4 INTEGER,
            probe5 INTEGER,
            probe6 INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_measurements_time
            ON measurements(captured_at);
        "#,
    )?;

    Ok(())
}

fn migrate(conn: &Connection, old_version: i32) -> Result<()> {
    tracing::info!(from = old_version, to = SCHEMA_VERSION, "Migrating schema");
    set_schema_version(conn, SCHEMA_VERSION)?;
    Ok(())
}
