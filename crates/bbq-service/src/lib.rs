//! Streams BBQ thermometer readings to storage, HTTP and WebSocket clients.
//!
//! The service connects to one thermometer through BlueZ, persists every
//! measurement and fans it out to any number of viewers.
//!
//! # REST API Endpoints
//!
//! - `GET /api/health` - Service health check
//! - `GET /api/metrics` - Pipeline counters
//! - `GET /api/latest` - Most recent measurement
//! - `GET /api/measurements` - Stored measurements
//! - `WS /api/ws` - Live measurement stream
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/bbq/service.toml`:
//!
//! ```toml
//! [sensor]
//! name = "BBQ"
//! call_timeout_secs = 10
//!
//! [server]
//! bind = "0.0.0.0:9000"
//! observer_buffer = 1
//!
//! [storage]
//! path = "~/.local/share/bbq/measurements.db"
//! enabled = true
//! ```

pub mod api;
pub mod config;
pub mod sink;
pub mod state;
pub mod ws;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::{Config, ConfigError, SensorConfig, ServerConfig, StorageConfig};
pub use sink::StoreSink;
pub use state::{AppState, MeasurementEvent, SharedStore};

/// Build the full HTTP application.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(api::router())
        .merge(ws::router())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
