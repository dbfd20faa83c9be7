use crate::api::ApiState;
use crate::broadcast::{BroadcastHub, ConnectionId, ConnectionState};
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, warn};

pub async fn slots_socket(ws: WebSocketUpgrade, State(state): State<ApiState>) -> Response {
    let hub = Arc::clone(&state.hub);
    ws.on_upgrade(move |socket| run_session(socket, hub))
}

/// Forward hub events to one client until either side closes.
/// Inbound frames are read only to notice the close.
async fn run_session(socket: WebSocket, hub: Arc<BroadcastHub>) {
    let mut state = ConnectionState::Connecting;
    let mut subscription = hub.connect();
    let id = subscription.id();
    advance(&mut state, ConnectionState::Open, id);
    debug!(connection_id = id, "Websocket session started");

    let (mut sink, mut stream) = socket.split();

    let mut writer = tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(err) => {
                    warn!(connection_id = id, error = %err, "Failed to encode slot event");
                    continue;
                }
            };
            if let Err(err) = sink.send(Message::Text(text.into())).await {
                debug!(connection_id = id, error = %err, "Socket write failed");
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut reader = tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(err) => {
                    debug!(connection_id = id, error = %err, "Socket read failed");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    hub.disconnect(id);
    advance(&mut state, ConnectionState::Closed, id);
    debug!(connection_id = id, "Websocket session ended");
}

fn advance(state: &mut ConnectionState, next: ConnectionState, id: ConnectionId) {
    let from = *state;
    if from.can_transition_to(next) {
        debug!(connection_id = id, ?from, to = ?next, "Connection state changed");
        *state = next;
    } else {
        warn!(connection_id = id, ?from, to = ?next, "Ignored invalid connection transition");
    }
}
