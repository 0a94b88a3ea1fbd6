//! Local persistence for BBQ thermometer measurements.
//!
//! This crate stores every processed [`bbq_types::Measurement`] in SQLite so
//! a cook can be reviewed after the fact.
//!
//! Disconnected probes are stored as `NULL` and come back as
//! [`bbq_types::PROBE_DISCONNECTED`].
//!
//! # Example
//!
//! ```
//! use bbq_store::{MeasurementQuery, Store};
//! use bbq_types::Measurement;
//! use time::OffsetDateTime;
//!
//! let store = Store::open_in_memory()?;
//! store.insert_measurement(&Measurement::new([20, 21, 22, 23, 24, 25], OffsetDateTime::now_utc()))?;
//!
//! let latest = store.latest()?.unwrap();
//! assert_eq!(latest.temperatures[0], 20);
//!
//! let last_ten = store.query_measurements(&MeasurementQuery::new().limit(10))?;
//! assert_eq!(last_ten.len(), 1);
//! # Ok::<(), bbq_store::Error>(())
//! ```

mod error;
mod models;
mod queries;
mod schema;
mod store;

pub use error::{Error, Result};
pub use models::StoredMeasurement;
pub use queries::MeasurementQuery;
pub use store::Store;

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/bbq/measurements.db`
/// - macOS: `~/Library/Application Support/bbq/measurements.db`
/// - Windows: `C:\Users\<user>\AppData\Local\bbq\measurements.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("bbq")
        .join("measurements.db")
}
