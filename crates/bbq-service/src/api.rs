//! REST API endpoints for the bbq-service.
//!
//! - `GET /api/health` - liveness and uptime
//! - `GET /api/metrics` - pipeline counters
//! - `GET /api/latest` - most recent measurement
//! - `GET /api/measurements` - stored measurements (`since`, `until`, `limit`)
//!
//! All endpoints return structured JSON errors via [`AppError`].

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use bbq_core::MetricsSnapshot;
use bbq_store::MeasurementQuery;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::state::{AppState, MeasurementEvent};

/// Measurements returned when no `limit` is given.
pub const DEFAULT_LIMIT: u32 = 100;

/// Largest accepted `limit`.
pub const MAX_LIMIT: u32 = 10_000;

/// Create the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/metrics", get(metrics))
        .route("/api/latest", get(latest))
        .route("/api/measurements", get(measurements))
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub uptime_secs: i64,
    pub storage_enabled: bool,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let now = OffsetDateTime::now_utc();
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: now,
        uptime_secs: (now - state.started_at).whole_seconds(),
        storage_enabled: state.store.is_some(),
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

async fn latest(State(state): State<Arc<AppState>>) -> Result<Json<MeasurementEvent>, AppError> {
    state
        .latest_measurement()
        .map(|m| Json(MeasurementEvent::from(m)))
        .ok_or_else(|| AppError::NotFound("No measurement received yet".to_string()))
}

/// Query parameters for stored measurements. Times are Unix seconds.
#[derive(Debug, Deserialize, Default)]
pub struct MeasurementsParams {
    pub since: Option<i64>,
    pub until: Option<i64>,
    pub limit: Option<u32>,
}

impl MeasurementsParams {
    /// Validate the parameters and turn them into a store query.
    pub fn to_query(&self) -> Result<MeasurementQuery, AppError> {
        if let (Some(since), Some(until)) = (self.since, self.until)
            && since > until
        {
            return Err(AppError::BadRequest(format!(
                "Invalid time range: 'since' ({}) must be less than or equal to 'until' ({})",
                since, until
            )));
        }

        let limit = self.limit.unwrap_or(DEFAULT_LIMIT);
        if limit == 0 || limit > MAX_LIMIT {
            return Err(AppError::BadRequest(format!(
                "'limit' must be between 1 and {MAX_LIMIT}"
            )));
        }

        let mut query = MeasurementQuery::new().limit(limit);
        if let Some(since) = self.since {
            query = query.since(parse_timestamp("since", since)?);
        }
        if let Some(until) = self.until {
            query = query.until(parse_timestamp("until", until)?);
        }
        Ok(query)
    }
}

fn parse_timestamp(name: &str, secs: i64) -> Result<OffsetDateTime, AppError> {
    OffsetDateTime::from_unix_timestamp(secs)
        .map_err(|e| AppError::BadRequest(format!("Invalid '{name}': {e}")))
}

async fn measurements(
    State(state): State<Arc<AppState>>,
    Query(params): Query<MeasurementsParams>,
) -> Result<Json<Vec<MeasurementEvent>>, AppError> {
    let query = params.to_query()?;
    let store = state
        .store
        .as_ref()
        .ok_or_else(|| AppError::Unavailable("Storage is disabled".to_string()))?;

    let stored = store.lock().await.query_measurements(&query)?;
    Ok(Json(
        stored
            .iter()
            .map(|s| MeasurementEvent::from(s.to_measurement()))
            .collect(),
    ))
}

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Unavailable(String),
    Store(bbq_store::Error),
}

impl From<bbq_store::Error> for AppError {
    fn from(e: bbq_store::Error) -> Self {
        AppError::Store(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            AppError::Store(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use bbq_core::{Broadcaster, Measurement, PROBE_DISCONNECTED, PipelineMetrics};
    use bbq_store::Store;
    use http_body_util::BodyExt;
    use time::macros::datetime;
    use tokio::sync::{Mutex, watch};
    use tower::ServiceExt;

    use crate::config::Config;

    struct TestState {
        state: Arc<AppState>,
        latest: watch::Sender<Option<Measurement>>,
    }

    fn create_test_state(store: Option<Store>) -> TestState {
        let (latest, rx) = watch::channel(None);
        let state = AppState::new(
            Config::default(),
            Arc::new(Broadcaster::new()),
            PipelineMetrics::shared(),
            rx,
            store.map(|s| Arc::new(Mutex::new(s))),
        );
        TestState { state, latest }
    }

    async fn get(state: &Arc<AppState>, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router()
            .with_state(Arc::clone(state))
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn sample(minute: i64, first: i16) -> Measurement {
        Measurement::new(
            [first, PROBE_DISCONNECTED, 0, 0, 0, 0],
            datetime!(2024-06-01 12:00:00 UTC) + time::Duration::minutes(minute),
        )
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let t = create_test_state(None);
        let (status, json) = get(&t.state, "/api/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert!(json["version"].is_string());
        assert!(json["timestamp"].is_string());
        assert_eq!(json["storage_enabled"], false);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let t = create_test_state(None);
        t.state.metrics.record_published();

        let (status, json) = get(&t.state, "/api/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["measurements_published"], 1);
        assert_eq!(json["mailbox_dropped"], 0);
    }

    #[tokio::test]
    async fn test_latest_not_found_then_found() {
        let t = create_test_state(None);
        let (status, json) = get(&t.state, "/api/latest").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(json["error"].is_string());

        t.latest.send_replace(Some(sample(0, 21)));
        let (status, json) = get(&t.state, "/api/latest").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["temperatures"][0], 21);
        assert_eq!(json["temperatures"][1], serde_json::Value::Null);
        assert_eq!(json["connected"], 5);
    }

    #[tokio::test]
    async fn test_measurements_without_storage() {
        let t = create_test_state(None);
        let (status, _) = get(&t.state, "/api/measurements").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_measurements_from_store() {
        let store = Store::open_in_memory().unwrap();
        for minute in 0..5 {
            store.insert_measurement(&sample(minute, minute as i16)).unwrap();
        }
        let t = create_test_state(Some(store));

        let (status, json) = get(&t.state, "/api/measurements?limit=2").await;
        assert_eq!(status, StatusCode::OK);
        let rows = json.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["temperatures"][0], 4);
        assert_eq!(rows[1]["temperatures"][0], 3);

        let since = sample(3, 0).captured_at.unix_timestamp();
        let (_, json) = get(&t.state, &format!("/api/measurements?since={since}")).await;
        assert_eq!(json.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_measurements_bad_params() {
        let t = create_test_state(Some(Store::open_in_memory().unwrap()));

        let (status, _) = get(&t.state, "/api/measurements?since=10&until=5").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = get(&t.state, "/api/measurements?limit=0").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_params_default_limit() {
        let query = MeasurementsParams::default().to_query().unwrap();
        assert_eq!(query.limit, Some(DEFAULT_LIMIT));
        assert!(query.newest_first);
    }

    #[test]
    fn test_app_error_status() {
        let response = AppError::NotFound("x".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let response = AppError::Unavailable("x".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
