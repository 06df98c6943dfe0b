//! WebSocket observer endpoint + health check.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use super::ProgressHub;

/// Build the router serving `/ws` and `/health`.
pub fn hub_routes(hub: Arc<ProgressHub>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .with_state(hub)
}

async fn health(State(hub): State<Arc<ProgressHub>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "task-mgmt",
        "observers": hub.observer_count(),
    }))
}

async fn ws_handler(ws: WebSocketUpgrade, State(hub): State<Arc<ProgressHub>>) -> impl IntoResponse {
    info!("Observer connecting");
    ws.on_upgrade(|socket| handle_socket(socket, hub))
}

async fn handle_socket(mut socket: WebSocket, hub: Arc<ProgressHub>) {
    let mut rx = hub.subscribe();
    info!("Observer connected");

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(envelope) => {
                        if socket.send(Message::Text(envelope.into())).await.is_err() {
                            debug!("Observer disconnected during send");
                            break;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        // Progress is at-most-once; skipped envelopes are gone.
                        warn!(missed = n, "Observer lagged behind broadcast");
                    }
                    Err(RecvError::Closed) => {
                        debug!("Broadcast channel closed");
                        break;
                    }
                }
            }

            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Observer disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!("Observer connection closed");
}
