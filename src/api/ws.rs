//! Progress websocket. Each connection tails one principal's progress
//! channel and forwards events as JSON text frames.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use crate::AppState;

pub async fn progress_socket(
    ws: WebSocketUpgrade,
    Path(user_id): Path<Uuid>,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| tail_progress(socket, state, user_id))
}

async fn tail_progress(mut socket: WebSocket, state: Arc<AppState>, user_id: Uuid) {
    let mut rx = state.broker.subscribe(user_id);
    tracing::debug!(user_id = %user_id, "progress socket opened");

    loop {
        tokio::select! {
            update = rx.recv() => match update {
                Ok(update) => {
                    let Ok(text) = serde_json::to_string(&update) else {
                        continue;
                    };
                    if socket.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                // Slow consumers skip ahead rather than killing the socket.
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(user_id = %user_id, skipped, "progress subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    let _ = socket.send(Message::Close(None)).await;
    // Reclaim the channel if this was the last subscriber, so idle
    // connections do not leave entries behind.
    drop(rx);
    state.broker.release(user_id);
    tracing::debug!(user_id = %user_id, "progress socket closed");
}
