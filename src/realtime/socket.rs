//! WebSocket endpoint.
//!
//! Route: GET /ws
//!
//! Each connection:
//!   1. subscribes to the broadcaster before reading any frame
//!   2. forwards every server event as a JSON text frame (plus keepalive pings)
//!   3. reads client frames, binding the connection to a user on `identify`
//!   4. releases its presence slot when either direction ends

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::ws::{Message, WebSocket},
    extract::{State, WebSocketUpgrade},
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::broadcast::{next_event, DeliveryError};
use super::presence::SocketId;
use crate::models::event::ClientEvent;
use crate::AppState;

/// Largest client frame accepted. Clients only ever send `identify`.
const MAX_MESSAGE_SIZE: usize = 64 * 1024;

const PING_INTERVAL: Duration = Duration::from_secs(30);

pub async fn ws_handler(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let socket_id: SocketId = Uuid::new_v4();
    let started = Instant::now();
    let mut events = state.broadcaster.subscribe();
    debug!(%socket_id, "socket connected");

    let (mut sink, mut stream) = socket.split();

    let mut send_task = tokio::spawn(async move {
        let mut ping = tokio::time::interval(PING_INTERVAL);
        ping.tick().await;
        let mut sent: u64 = 0;
        loop {
            tokio::select! {
                event = next_event(&mut events) => {
                    let Some(event) = event else { break };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(%socket_id, event = event.name(), "failed to encode event: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        debug!(%socket_id, error = %DeliveryError::Socket(e.to_string()), "socket send failed");
                        break;
                    }
                    sent += 1;
                }
                _ = ping.tick() => {
                    if sink.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
        sent
    });

    let recv_state = state.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = stream.next().await {
            match msg {
                Message::Text(text) => handle_client_frame(&recv_state, socket_id, &text),
                Message::Close(_) => break,
                // pings are answered by axum, binary frames carry nothing we use
                _ => {}
            }
        }
    });

    // stop when either direction ends, and wait for the other one to wind
    // down so no identify can land after the disconnect below
    let (sent, recv_result) = tokio::select! {
        res = &mut send_task => {
            recv_task.abort();
            (res, recv_task.await)
        }
        res = &mut recv_task => {
            send_task.abort();
            (send_task.await, res)
        }
    };

    let sent = match sent {
        Ok(n) => n,
        Err(e) if e.is_cancelled() => 0,
        Err(e) => {
            warn!(%socket_id, "socket send task failed: {}", e);
            0
        }
    };
    if let Err(e) = recv_result {
        if !e.is_cancelled() {
            warn!(%socket_id, "socket receive task failed: {}", e);
        }
    }

    state.presence.disconnect(socket_id);
    info!(
        %socket_id,
        events_sent = sent,
        duration_ms = started.elapsed().as_millis() as u64,
        "socket closed"
    );
}

fn handle_client_frame(state: &AppState, socket_id: SocketId, text: &str) {
    match serde_json::from_str::<ClientEvent>(text) {
        Ok(ClientEvent::Identify(payload)) => {
            let user_id = payload.user_id.trim();
            if user_id.is_empty() {
                debug!(%socket_id, "identify without user id ignored");
                return;
            }
            state.presence.identify(socket_id, user_id);
        }
        Err(e) => {
            debug!(%socket_id, "ignoring unrecognised client frame: {}", e);
        }
    }
}
