//! Query builder for stored measurements.
//!
//! # Example
//!
//! ```
//! use bbq_store::{MeasurementQuery, Store};
//! use time::{Duration, OffsetDateTime};
//!
//! let store = Store::open_in_memory()?;
//! let an_hour_ago = OffsetDateTime::now_utc() - Duration::hours(1);
//!
//! // The last hour, oldest first, for charting
//! let query = MeasurementQuery::new().since(an_hour_ago).oldest_first();
//! let measurements = store.query_measurements(&query)?;
//! # Ok::<(), bbq_store::Error>(())
//! ```

use time::OffsetDateTime;

use crate::schema::to_millis;

/// Fluent query builder for measurements.
///
/// By default, queries return results ordered by `captured_at` descending
/// (newest first).
#[derive(Debug, Default, Clone)]
pub struct MeasurementQuery {
    /// Filter measurements at or after this time.
    pub since: Option<OffsetDateTime>,
    /// Filter measurements at or before this time.
    pub until: Option<OffsetDateTime>,
    /// Maximum number of results.
    pub limit: Option<u32>,
    /// Offset for pagination.
    pub offset: Option<u32>,
    /// Order by captured_at descending (newest first).
    pub newest_first: bool,
}

impl MeasurementQuery {
    /// Create a new query: no filters, no limit, newest first.
    pub fn new() -> Self {
        Self {
            newest_first: true,
            ..Default::default()
        }
    }

    /// Filter to measurements captured at or after this time.
    pub fn since(mut self, time: OffsetDateTime) -> Self {
        self.since = Some(time);
        self
    }

    /// Filter to measurements captured at or before this time.
    pub fn until(mut self, time: OffsetDateTime) -> Self {
        self.until = Some(time);
        self
    }

    /// Limit the maximum number of results returned.
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip the first N results.
    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Order results by oldest first.
    pub fn oldest_first(mut self) -> Self {
        self.newest_first = false;
        self
    }

    /// Build the SQL WHERE clause and parameters.
    pub(crate) fn build_where(&self) -> (String, Vec<i64>) {
        let mut conditions = Vec::new();
        let mut params = Vec::new();

        if let Some(since) = self.since {
            conditions.push("captured_at >= ?");
            params.push(to_millis(since));
        }

        if let Some(until) = self.until {
            conditions.push("captured_at <= ?");
            params.push(to_millis(until));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    /// Build the full SQL query.
    pub(crate) fn build_sql(&self) -> String {
        let (where_clause, _) = self.build_where();
        let order = if self.newest_first { "DESC" } else { "ASC" };

        let mut sql = format!(
            "SELECT id, captured_at, probe1, probe2, probe3, probe4, probe5, probe6 \
             FROM measurements {where_clause} ORDER BY captured_at {order}, id {order}"
        );

        // SQLite only accepts OFFSET after a LIMIT
        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}")),
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {limit}")),
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
            (None, None) => {}
        }

        sql
    }
}
