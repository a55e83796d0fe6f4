//! Slack RTM event stream with automatic reconnection.
//!
//! Maintains a persistent RTM websocket and translates its frames into
//! [`PlatformEvent`]s. Each successful connection is announced with a
//! `Connected` event carrying a fresh workspace snapshot.

use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use super::PlatformGateway;
use super::client::{RtmConnect, SlackClient};
use super::error::{GatewayResult, SlackError};
use super::types::{PlatformEvent, PlatformMessage, WorkspaceInfo};

/// Base delay for exponential backoff (milliseconds).
const BASE_BACKOFF_MS: u64 = 500;

/// Maximum backoff delay (milliseconds).
const MAX_BACKOFF_MS: u64 = 30_000;

/// Interval between RTM pings.
const PING_INTERVAL_SECS: u64 = 30;

/// If nothing arrives for this long, reconnect.
const KEEPALIVE_TIMEOUT_SECS: u64 = 60;

/// How a connection ended without an error.
#[derive(Debug, PartialEq, Eq)]
enum StreamEnd {
    /// Slack closed the socket or said goodbye; reconnect.
    Closed,
    /// Nobody is listening for events anymore; stop.
    ReceiverGone,
}

/// A parsed RTM frame.
#[derive(Debug)]
enum RtmFrame {
    Event(PlatformEvent),
    Goodbye,
    Skip,
}

/// RTM event source. Runs until its receiver is dropped or credentials are
/// rejected.
pub struct RtmSource {
    client: Arc<SlackClient>,
}

impl RtmSource {
    pub fn new(client: Arc<SlackClient>) -> Self {
        Self { client }
    }

    /// Spawn the event stream and return its receiving end.
    pub fn spawn(self, capacity: usize) -> (mpsc::Receiver<PlatformEvent>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity);
        let handle = tokio::spawn(async move { self.run(tx).await });
        (rx, handle)
    }

    /// Run the stream, forwarding events into `events`.
    pub async fn run(self, events: mpsc::Sender<PlatformEvent>) {
        let mut attempt = 0u32;
        let mut connections = 0u32;

        loop {
            if attempt > 0 {
                let delay = calculate_backoff(attempt);
                info!("reconnecting to slack rtm in {}ms (attempt {})", delay, attempt);
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            match self.connect_and_stream(&events, &mut connections).await {
                Ok(StreamEnd::Closed) => {
                    info!("slack rtm stream ended, reconnecting");
                    attempt = 1;
                }
                Ok(StreamEnd::ReceiverGone) => {
                    debug!("slack rtm event receiver dropped, stopping");
                    return;
                }
                Err(e) if e.is_auth_failure() => {
                    error!("slack rtm rejected credentials: {}", e);
                    let _ = events.send(PlatformEvent::InvalidAuth).await;
                    return;
                }
                Err(e) => {
                    attempt = attempt.saturating_add(1);
                    warn!("slack rtm connection failed (attempt {}): {}", attempt, e);
                }
            }
        }
    }

    /// Connect once and pump frames until the socket ends.
    async fn connect_and_stream(
        &self,
        events: &mpsc::Sender<PlatformEvent>,
        connections: &mut u32,
    ) -> GatewayResult<StreamEnd> {
        let connect = self.client.rtm_connect().await?;
        let info = load_workspace(self.client.as_ref(), &connect).await?;

        let (socket, _) = tokio_tungstenite::connect_async(connect.url.as_str())
            .await
            .map_err(|e| SlackError::Rtm(e.to_string()))?;
        *connections += 1;
        info!(
            "connected to slack rtm as {} on team {} (connection {})",
            connect.self_user.name, connect.team.name, connections
        );

        let connected = PlatformEvent::Connected {
            info: Arc::new(info),
            connection_count: *connections,
        };
        if events.send(connected).await.is_err() {
            return Ok(StreamEnd::ReceiverGone);
        }

        let (mut sink, mut stream) = socket.split();
        let mut ping_interval = tokio::time::interval(Duration::from_secs(PING_INTERVAL_SECS));
        ping_interval.tick().await;
        let mut ping_id = 0u64;
        let mut last_seen = Instant::now();

        loop {
            tokio::select! {
                frame = stream.next() => {
                    last_seen = Instant::now();
                    match frame {
                        None => return Ok(StreamEnd::Closed),
                        Some(Err(e)) => return Err(SlackError::Rtm(e.to_string())),
                        Some(Ok(Message::Text(text))) => match parse_frame(text.as_str()) {
                            RtmFrame::Event(event) => {
                                if events.send(event).await.is_err() {
                                    return Ok(StreamEnd::ReceiverGone);
                                }
                            }
                            RtmFrame::Goodbye => return Ok(StreamEnd::Closed),
                            RtmFrame::Skip => {}
                        },
                        Some(Ok(Message::Close(_))) => return Ok(StreamEnd::Closed),
                        Some(Ok(_)) => {}
                    }
                }

                _ = ping_interval.tick() => {
                    if last_seen.elapsed() > Duration::from_secs(KEEPALIVE_TIMEOUT_SECS) {
                        return Err(SlackError::Rtm(format!(
                            "no traffic for {}s",
                            KEEPALIVE_TIMEOUT_SECS
                        )));
                    }
                    ping_id += 1;
                    let ping = serde_json::json!({ "id": ping_id, "type": "ping" }).to_string();
                    sink.send(Message::Text(ping.into()))
                        .await
                        .map_err(|e| SlackError::Rtm(e.to_string()))?;
                }
            }
        }
    }
}

/// Snapshot channels and users for a new connection.
async fn load_workspace(
    gateway: &dyn PlatformGateway,
    connect: &RtmConnect,
) -> GatewayResult<WorkspaceInfo> {
    let channels = gateway.channels().await?;
    let users = gateway.users().await?;
    Ok(WorkspaceInfo {
        team: connect.team.clone(),
        self_user: connect.self_user.clone(),
        channels,
        users,
    })
}

/// Calculate exponential backoff delay.
fn calculate_backoff(attempt: u32) -> u64 {
    let exponent = attempt.saturating_sub(1).min(16);
    BASE_BACKOFF_MS
        .saturating_mul(1u64 << exponent)
        .min(MAX_BACKOFF_MS)
}

/// Translate one RTM text frame.
fn parse_frame(text: &str) -> RtmFrame {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            debug!("skipping unparseable rtm frame: {}", e);
            return RtmFrame::Skip;
        }
    };

    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    match kind.as_str() {
        // Replies to our own pings and sends carry no type.
        "" | "pong" => RtmFrame::Skip,
        "goodbye" => RtmFrame::Goodbye,
        "message" => match serde_json::from_value::<PlatformMessage>(value) {
            Ok(message) => RtmFrame::Event(PlatformEvent::Message(message)),
            Err(e) => {
                debug!("skipping malformed message event: {}", e);
                RtmFrame::Skip
            }
        },
        "error" => {
            warn!("slack rtm error event: {}", value.get("error").unwrap_or(&Value::Null));
            RtmFrame::Event(PlatformEvent::Other(kind))
        }
        _ => RtmFrame::Event(PlatformEvent::Other(kind)),
    }
}
