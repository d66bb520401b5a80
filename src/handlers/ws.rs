use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use uuid::Uuid;
use serde::Deserialize;

use crate::auth::jwt::{verify_token, TokenType};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

/// Live activity stream: day completions, challenge starts, and milestones
/// are pushed to every connected client as they happen. Chat stays on the
/// polling endpoints.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> Response {
    let user_id = match authenticate_ws(&state, query.token.as_deref()) {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!("WebSocket auth failed: {}", e);
            return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id))
}

fn authenticate_ws(state: &AppState, token: Option<&str>) -> Result<Uuid, &'static str> {
    let token = token.ok_or("Missing token query parameter")?;

    let token_data = verify_token(token, &state.config).map_err(|_| "Invalid or expired token")?;

    if token_data.claims.token_type != TokenType::Access {
        return Err("Must use access token for WebSocket");
    }

    Ok(token_data.claims.sub)
}

async fn handle_socket(socket: WebSocket, state: AppState, user_id: Uuid) {
    let (mut sender, mut receiver) = socket.split();

    tracing::debug!(user_id = %user_id, "WebSocket connection established");

    let Some(mut rx) = state.ws_tx.as_ref().map(|tx| tx.subscribe()) else {
        tracing::warn!("WebSocket broadcast channel not initialized");
        return;
    };

    // Forward broadcast activity events to this client.
    let mut send_task = tokio::spawn(async move {
        while let Ok(msg) = rx.recv().await {
            if sender.send(Message::Text(msg)).await.is_err() {
                break;
            }
        }
    });

    // Drain client frames so pings and closes are handled.
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    tracing::debug!(user_id = %user_id, message = %text, "WebSocket message received");
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    tracing::debug!(user_id = %user_id, "WebSocket connection closed");
}
