//! Main store implementation.

use std::path::Path;

use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row};
use tracing::{debug, info};

use bbq_types::Measurement;

use crate::error::{Error, Result};
use crate::models::{StoredMeasurement, probe_columns};
use crate::queries::MeasurementQuery;
use crate::schema::{self, from_millis, to_millis};

const SELECT_COLUMNS: &str =
    "SELECT id, captured_at, probe1, probe2, probe3, probe4, probe5, probe6 FROM measurements";

/// SQLite-based store for thermometer measurements.
pub struct Store {
    conn: Connection,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.conn.path())
            .finish()
    }
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        info!("Opening database at {}", path.display());
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        schema::initialize(&conn)?;

        Ok(Self { conn })
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    /// Insert one measurement, returning its row ID.
    pub fn insert_measurement(&self, measurement: &Measurement) -> Result<i64> {
        let [p1, p2, p3, p4, p5, p6] = probe_columns(measurement);
        self.conn.execute(
            "INSERT INTO measurements
                (captured_at, probe1, probe2, probe3, probe4, probe5, probe6)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![to_millis(measurement.captured_at), p1, p2, p3, p4, p5, p6],
        )?;
        let id = self.conn.last_insert_rowid();
        debug!(id, "Stored measurement");
        Ok(id)
    }

    /// The most recent measurement, if any.
    pub fn latest(&self) -> Result<Option<StoredMeasurement>> {
        let sql = format!("{SELECT_COLUMNS} ORDER BY captured_at DESC, id DESC LIMIT 1");
        let stored = self
            .conn
            .query_row(&sql, [], row_to_measurement)
            .optional()?;
        Ok(stored)
    }

    /// Up to `limit` measurements, newest first.
    pub fn recent(&self, limit: u32) -> Result<Vec<StoredMeasurement>> {
        self.query_measurements(&MeasurementQuery::new().limit(limit))
    }

    /// Query measurements.
    pub fn query_measurements(&self, query: &MeasurementQuery) -> Result<Vec<StoredMeasurement>> {
        let sql = query.build_sql();
        let (_, params) = query.build_where();

        debug!("Executing query: {}", sql);

        let mut stmt = self.conn.prepare(&sql)?;
        let measurements = stmt
            .query_map(rusqlite::params_from_iter(params), row_to_measurement)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(measurements)
    }

    /// Count stored measurements.
    pub fn count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM measurements", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

fn row_to_measurement(row: &Row<'_>) -> rusqlite::Result<StoredMeasurement> {
    let millis: i64 = row.get(1)?;
    let captured_at = from_millis(millis)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Integer, Box::new(e)))?;
    Ok(StoredMeasurement::from_columns(
        row.get(0)?,
        captured_at,
        [
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
            row.get(6)?,
            row.get(7)?,
        ],
    ))
}
