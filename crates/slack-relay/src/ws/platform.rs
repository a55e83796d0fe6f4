//! Platform event pump.
//!
//! Bridges the gateway's event stream into the hub: releases the startup
//! signal on the first connection and broadcasts relayable messages in
//! arrival order.

use log::{debug, error, info, trace, warn};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use super::codec::{encode_message, is_relayable};
use super::hub::HubHandle;
use crate::slack::{PlatformEvent, PlatformGateway, WorkspaceInfo};

/// Consume platform events until the stream ends or the hub stops.
pub async fn relay_platform_events(
    mut events: mpsc::Receiver<PlatformEvent>,
    gateway: Arc<dyn PlatformGateway>,
    hub: HubHandle,
    ready: oneshot::Sender<Arc<WorkspaceInfo>>,
    log_messages: bool,
) {
    let mut ready = Some(ready);

    while let Some(event) = events.recv().await {
        match event {
            PlatformEvent::Connected {
                info,
                connection_count,
            } => match ready.take() {
                Some(signal) => {
                    info!(
                        "slack connected as {}, {} channels visible",
                        info.self_user.name,
                        info.channels.len()
                    );
                    if signal.send(info).is_err() {
                        warn!("relay hub stopped before slack connected");
                    }
                }
                None => debug!(
                    "slack reconnected (connection {}), keeping initial workspace snapshot",
                    connection_count
                ),
            },

            PlatformEvent::Message(message) => {
                if !is_relayable(&message) {
                    if log_messages {
                        info!("skipping message {:?}", message);
                    }
                    continue;
                }
                if log_messages {
                    info!("message {:?}", message);
                }
                let frame = match encode_message(&message, gateway.as_ref()).await {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!("failed to encode message {}: {}", message.ts, e);
                        continue;
                    }
                };
                if hub.broadcast(frame).await.is_err() {
                    debug!("relay hub stopped, ending platform event pump");
                    return;
                }
            }

            PlatformEvent::InvalidAuth => error!("rtm error: invalid credentials"),

            PlatformEvent::Other(kind) => trace!("ignoring slack event {}", kind),
        }
    }

    info!("platform event stream ended");
}
