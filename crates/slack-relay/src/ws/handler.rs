//! WebSocket handler for client connections.

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, Utf8Bytes, WebSocket},
    },
    response::Response,
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use std::str::Utf8Error;
use std::time::Duration;

use super::hub::HubHandle;
use super::types::Frame;
use crate::api::AppState;

/// Ping interval for keepalive.
const PING_INTERVAL_SECS: u64 = 30;

/// Largest inbound message (and frame) a client may send. Anything bigger is
/// a protocol error and ends the connection.
pub const MAX_INBOUND_FRAME_BYTES: usize = 64 * 1024;

/// WebSocket upgrade handler.
///
/// GET /stream
pub async fn stream_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    debug!("websocket upgrade request on /stream");
    let hub = state.hub.clone();
    ws.max_message_size(MAX_INBOUND_FRAME_BYTES)
        .max_frame_size(MAX_INBOUND_FRAME_BYTES)
        .on_upgrade(move |socket| handle_connection(socket, hub))
}

/// Serve one client connection until either side goes away.
async fn handle_connection(socket: WebSocket, hub: HubHandle) {
    let connection = match hub.connect().await {
        Ok(connection) => connection,
        Err(e) => {
            warn!("rejecting websocket connection: {}", e);
            return;
        }
    };
    let client = connection.id;
    let mut outbound = connection.outbound;
    info!("client {} connected", client);

    let (mut sender, mut receiver) = socket.split();

    // Writer: drains the hub's frames into the socket. Ends when the hub
    // drops the session or the socket fails.
    let mut send_task = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(Duration::from_secs(PING_INTERVAL_SECS));
        ping_interval.tick().await;

        loop {
            tokio::select! {
                frame = outbound.recv() => {
                    let Some(frame) = frame else {
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    };
                    let text = match frame_text(frame) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("dropping non utf-8 frame for client {}: {}", client, e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    loop {
        tokio::select! {
            _ = &mut send_task => {
                debug!("writer for client {} finished", client);
                break;
            }
            message = receiver.next() => {
                let raw = match message {
                    Some(Ok(Message::Text(text))) => Bytes::copy_from_slice(text.as_str().as_bytes()),
                    Some(Ok(Message::Binary(data))) => data,
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("client {} closed the connection", client);
                        break;
                    }
                    Some(Err(e)) => {
                        debug!("websocket error for client {}: {}", client, e);
                        break;
                    }
                };
                if hub.submit(client, raw).await.is_err() {
                    break;
                }
            }
        }
    }

    send_task.abort();
    hub.disconnect(client).await;
    info!("client {} disconnected", client);
}

/// Frames are JSON, so this is a validation pass rather than a copy.
fn frame_text(frame: Frame) -> Result<Utf8Bytes, Utf8Error> {
    Utf8Bytes::try_from(frame)
}
