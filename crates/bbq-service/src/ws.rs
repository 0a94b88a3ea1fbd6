//! WebSocket handler for live measurements.
//!
//! Each connection subscribes one observer to the [`bbq_core::Broadcaster`]
//! and is unsubscribed when the client goes away.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use crate::state::{AppState, MeasurementEvent};

/// Create the WebSocket router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/api/ws", get(ws_handler))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

fn to_message(event: &MeasurementEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            warn!("Failed to serialize measurement: {}", e);
            None
        }
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before sending the snapshot so nothing published meanwhile is lost
    let mut observer = state.broadcaster.subscribe().await;
    let observer_id = observer.id();

    info!(observer = observer_id, "WebSocket client connected");

    if let Some(message) = state
        .latest_measurement()
        .map(MeasurementEvent::from)
        .as_ref()
        .and_then(to_message)
        && sender.send(message).await.is_err()
    {
        info!("WebSocket client disconnected during initial snapshot");
        state.broadcaster.unsubscribe(observer_id).await;
        return;
    }

    let mut send_task = tokio::spawn(async move {
        while let Some(measurement) = observer.recv().await {
            let Some(message) = to_message(&MeasurementEvent::from(measurement)) else {
                continue;
            };
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Close(_)) => break,
                Ok(Message::Ping(_)) => debug!("Received ping"),
                Ok(_) => {}
                Err(e) => {
                    warn!("WebSocket receive error: {}", e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
        },
        _ = &mut recv_task => {
            send_task.abort();
        },
    }

    state.broadcaster.unsubscribe(observer_id).await;
    info!(observer = observer_id, "WebSocket client disconnected");
}
