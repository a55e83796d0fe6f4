//! Relay hub: the single task that owns every client session.
//!
//! The hub is responsible for:
//! - Registering and unregistering client connections
//! - Fanning platform messages out to every client
//! - Routing client requests (auth, send, history)
//! - Issuing and verifying anonymous identities
//!
//! All inputs arrive over bounded channels held by [`HubHandle`]s; the hub
//! never awaits a client.

use bytes::Bytes;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use super::codec::{self, encode_message, is_relayable};
use super::registry::{ClientId, ClientRegistry, ClientSession};
use super::types::{Frame, InboundRequest, decode_inbound};
use crate::auth::{Identity, IdentitySigner};
use crate::slack::{OutgoingPost, PlatformGateway, TeamProfile, WorkspaceInfo, avatar_url};

/// Warning attached to an auth frame when a presented token was replaced.
pub const INVALID_IDENTITY_WARNING: &str = "invalid identity provided. generated new identity.";

/// Name logged for requests from clients that never authenticated.
const ANONYMOUS: &str = "<anonymous>";

/// Default per-client outbound buffer.
pub const DEFAULT_CLIENT_BUFFER: usize = 64;

/// Default buffer for hub input channels.
pub const DEFAULT_INBOUND_BUFFER: usize = 256;

/// Hub sizing.
#[derive(Debug, Clone, Copy)]
pub struct HubConfig {
    /// Frames a client may fall behind before it is dropped.
    pub client_buffer: usize,
    /// Capacity of each hub input channel.
    pub inbound_buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            client_buffer: DEFAULT_CLIENT_BUFFER,
            inbound_buffer: DEFAULT_INBOUND_BUFFER,
        }
    }
}

/// Fatal hub failures.
#[derive(Debug, Error)]
pub enum HubError {
    /// The event stream went away before the first connection.
    #[error("platform event stream closed before the first connection")]
    UpstreamClosed,

    #[error("failed to encode welcome frame: {0}")]
    Welcome(#[from] serde_json::Error),
}

/// The hub has stopped and no longer accepts input.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("relay hub is not running")]
pub struct HubClosed;

/// A channel reference matched nothing in the workspace.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("no channel found matching {0:?}")]
pub struct ResolutionError(pub String);

/// Resolve a channel id or name to its canonical id.
pub fn resolve_channel(workspace: &WorkspaceInfo, reference: &str) -> Result<String, ResolutionError> {
    workspace
        .resolve_channel(reference)
        .map(str::to_string)
        .ok_or_else(|| ResolutionError(reference.to_string()))
}

/// A raw frame read from a client.
#[derive(Debug)]
struct Inbound {
    client: ClientId,
    raw: Bytes,
}

/// The receiving side of a registered client.
#[derive(Debug)]
pub struct ClientConnection {
    pub id: ClientId,
    /// Closed by the hub when the client is unregistered or evicted.
    pub outbound: mpsc::Receiver<Frame>,
}

/// Cloneable handle used to talk to the hub.
///
/// The hub runs until every handle has been dropped.
#[derive(Debug, Clone)]
pub struct HubHandle {
    register_tx: mpsc::Sender<ClientSession>,
    unregister_tx: mpsc::Sender<ClientId>,
    inbound_tx: mpsc::Sender<Inbound>,
    broadcast_tx: mpsc::Sender<Frame>,
    next_id: Arc<AtomicU64>,
    clients: Arc<AtomicUsize>,
    client_buffer: usize,
}

impl HubHandle {
    /// Open a session. The welcome frame is the first thing on `outbound`.
    ///
    /// Before the hub is running the registration waits in its queue.
    pub async fn connect(&self) -> Result<ClientConnection, HubClosed> {
        let id = ClientId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.client_buffer);
        self.register_tx
            .send(ClientSession::new(id, tx))
            .await
            .map_err(|_| HubClosed)?;
        Ok(ClientConnection { id, outbound: rx })
    }

    /// Close a session. Safe to call for an already evicted client.
    pub async fn disconnect(&self, id: ClientId) {
        if self.unregister_tx.send(id).await.is_err() {
            debug!("hub stopped before client {} disconnected", id);
        }
    }

    /// Hand a raw client frame to the hub.
    pub async fn submit(&self, client: ClientId, raw: Bytes) -> Result<(), HubClosed> {
        self.inbound_tx
            .send(Inbound { client, raw })
            .await
            .map_err(|_| HubClosed)
    }

    /// Queue a frame for every connected client.
    pub async fn broadcast(&self, frame: Frame) -> Result<(), HubClosed> {
        self.broadcast_tx.send(frame).await.map_err(|_| HubClosed)
    }

    /// Clients currently registered.
    pub fn client_count(&self) -> usize {
        self.clients.load(Ordering::Relaxed)
    }
}

/// The relay hub event loop.
pub struct RelayHub {
    gateway: Arc<dyn PlatformGateway>,
    signer: IdentitySigner,
    registry: ClientRegistry,
    register_rx: mpsc::Receiver<ClientSession>,
    unregister_rx: mpsc::Receiver<ClientId>,
    inbound_rx: mpsc::Receiver<Inbound>,
    broadcast_rx: mpsc::Receiver<Frame>,
    clients: Arc<AtomicUsize>,
}

impl RelayHub {
    /// Create a hub and the first handle to it.
    pub fn new(
        gateway: Arc<dyn PlatformGateway>,
        signer: IdentitySigner,
        config: HubConfig,
    ) -> (Self, HubHandle) {
        let (register_tx, register_rx) = mpsc::channel(config.inbound_buffer);
        let (unregister_tx, unregister_rx) = mpsc::channel(config.inbound_buffer);
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_buffer);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(config.inbound_buffer);
        let clients = Arc::new(AtomicUsize::new(0));

        let hub = Self {
            gateway,
            signer,
            registry: ClientRegistry::new(),
            register_rx,
            unregister_rx,
            inbound_rx,
            broadcast_rx,
            clients: clients.clone(),
        };
        let handle = HubHandle {
            register_tx,
            unregister_tx,
            inbound_tx,
            broadcast_tx,
            next_id: Arc::new(AtomicU64::new(1)),
            clients,
            client_buffer: config.client_buffer,
        };
        (hub, handle)
    }

    /// Run the hub.
    ///
    /// Loads team metadata, waits for the first platform connection on
    /// `ready`, then serves until every [`HubHandle`] is dropped.
    pub async fn run(mut self, ready: oneshot::Receiver<Arc<WorkspaceInfo>>) -> Result<(), HubError> {
        info!("relay hub initializing");
        let (team, emoji) = self.load_team_metadata().await;

        let workspace = ready.await.map_err(|_| HubError::UpstreamClosed)?;
        let team = if team.name.is_empty() {
            workspace.team.clone()
        } else {
            team
        };
        let welcome = codec::encode_welcome(&team, &workspace.channels, &workspace.users, &emoji)?;
        info!(
            "relay hub running for team {} ({} channels, {} users, {} emoji)",
            team.name,
            workspace.channels.len(),
            workspace.users.len(),
            emoji.len()
        );

        loop {
            tokio::select! {
                // A client's registration is always queued before its first
                // request, so draining registrations first keeps them ordered.
                biased;

                Some(session) = self.register_rx.recv() => {
                    self.registry.register(session, &welcome);
                }
                Some(id) = self.unregister_rx.recv() => {
                    self.registry.unregister(id);
                }
                Some(inbound) = self.inbound_rx.recv() => {
                    self.handle_inbound(inbound, &workspace);
                }
                Some(frame) = self.broadcast_rx.recv() => {
                    for id in self.registry.broadcast(&frame) {
                        warn!("client {} could not keep up and was dropped", id);
                    }
                }
                else => break,
            }
            self.clients.store(self.registry.len(), Ordering::Relaxed);
        }

        info!("relay hub stopped");
        Ok(())
    }

    /// Team profile and custom emoji for the welcome frame. Failures are
    /// logged and leave the defaults in place.
    async fn load_team_metadata(&self) -> (TeamProfile, HashMap<String, String>) {
        let emoji = match self.gateway.custom_emoji().await {
            Ok(emoji) => emoji,
            Err(e) => {
                error!("error loading custom emoji: {}", e);
                HashMap::new()
            }
        };
        let team = match self.gateway.team_info().await {
            Ok(team) => team,
            Err(e) => {
                error!("error loading team info: {}", e);
                TeamProfile::default()
            }
        };
        (team, emoji)
    }

    fn handle_inbound(&mut self, inbound: Inbound, workspace: &WorkspaceInfo) {
        let Inbound { client, raw } = inbound;
        if !self.registry.contains(client) {
            debug!("ignoring request from unregistered client {}", client);
            return;
        }

        let request = match decode_inbound(&raw) {
            Ok(request) => request,
            Err(e) => {
                warn!("client {}: {}", client, e);
                return;
            }
        };

        match request {
            InboundRequest::Authenticate { token } => self.authenticate(client, token),
            InboundRequest::SendMessage { channel, text } => {
                self.send_message(client, &channel, text, workspace)
            }
            InboundRequest::FetchHistory { channel, limit } => {
                self.fetch_history(client, &channel, limit, workspace)
            }
        }
    }

    /// Bind an identity to the client and tell it which token to keep.
    fn authenticate(&mut self, client: ClientId, token: String) {
        let (identity, token, warning) = if token.is_empty() {
            match self.signer.issue() {
                Ok((identity, token)) => {
                    info!("issued identity {} to client {}", identity, client);
                    (identity, token, None)
                }
                Err(e) => {
                    error!("failed to issue identity for client {}: {}", client, e);
                    return;
                }
            }
        } else {
            match self.signer.verify(&token) {
                Ok(identity) => {
                    debug!("client {} authenticated as {}", client, identity);
                    (identity, token, None)
                }
                Err(e) => {
                    warn!("client {} presented an invalid token: {}", client, e);
                    match self.signer.issue() {
                        Ok((identity, token)) => {
                            info!("re-issued identity {} to client {}", identity, client);
                            (identity, token, Some(INVALID_IDENTITY_WARNING))
                        }
                        Err(e) => {
                            error!("failed to issue identity for client {}: {}", client, e);
                            return;
                        }
                    }
                }
            }
        };

        let frame = match codec::encode_auth(&token, warning) {
            Ok(frame) => frame,
            Err(e) => {
                error!("failed to encode auth reply: {}", e);
                return;
            }
        };
        self.registry.bind_identity(client, identity);
        if let Err(e) = self.registry.send_to(client, frame) {
            warn!("{}", e);
        }
    }

    fn send_message(&self, client: ClientId, channel: &str, text: String, workspace: &WorkspaceInfo) {
        let Some(identity) = self.registry.identity(client).cloned() else {
            warn!("skipping message send because client {} is not authenticated", client);
            return;
        };
        let channel_id = match resolve_channel(workspace, channel) {
            Ok(id) => id,
            Err(e) => {
                error!("{} (skipping send as {})", e, identity);
                return;
            }
        };

        info!("sending as {} to channel {}", identity, channel_id);
        let Identity { username } = identity;
        let post = OutgoingPost {
            channel_id,
            text,
            icon_url: avatar_url(&username),
            username,
        };
        let gateway = self.gateway.clone();
        tokio::spawn(async move {
            let username = post.username.clone();
            if let Err(e) = gateway.post_message(post).await {
                error!("failed to send message as {}: {}", username, e);
            }
        });
    }

    fn fetch_history(&self, client: ClientId, channel: &str, limit: usize, workspace: &WorkspaceInfo) {
        let requester = self
            .registry
            .identity(client)
            .map(|i| i.username.clone())
            .unwrap_or_else(|| ANONYMOUS.to_string());
        let channel_id = match resolve_channel(workspace, channel) {
            Ok(id) => id,
            Err(e) => {
                error!("{} (skipping history for {})", e, requester);
                return;
            }
        };
        let Some(target) = self.registry.replay_target(client) else {
            return;
        };

        info!("sending previous messages for channel {} to {}", channel_id, requester);
        let gateway = self.gateway.clone();
        tokio::spawn(async move {
            let frames = previous_messages(gateway.as_ref(), &channel_id, limit).await;
            let total = frames.len();
            let delivered = target.deliver(frames).await;
            if delivered < total {
                debug!(
                    "client {} left during history replay ({} of {} sent)",
                    client, delivered, total
                );
            }
        });
    }
}

/// Encode up to `limit` recent relayable messages of a channel, oldest
/// first. Gateway errors are logged and yield nothing.
pub async fn previous_messages(
    gateway: &dyn PlatformGateway,
    channel_id: &str,
    limit: usize,
) -> Vec<Frame> {
    let history = match gateway.history(channel_id, limit).await {
        Ok(history) => history,
        Err(e) => {
            error!("error fetching history for channel {}: {}", channel_id, e);
            return Vec::new();
        }
    };

    let mut frames = Vec::new();
    for mut message in history.into_iter().take(limit).rev() {
        if !is_relayable(&message) {
            continue;
        }
        message.channel = channel_id.to_string();
        match encode_message(&message, gateway).await {
            Ok(frame) => frames.push(frame),
            Err(e) => warn!("failed to encode history message {}: {}", message.ts, e),
        }
    }
    frames
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slack::{Channel, GatewayResult, PlatformMessage, SlackError, UserProfile};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::timeout;

    const SECRET: &str = "hub-test-secret";

    #[derive(Default)]
    struct FakeGateway {
        history: Vec<PlatformMessage>,
        posts: Mutex<Vec<OutgoingPost>>,
    }

    #[async_trait]
    impl PlatformGateway for FakeGateway {
        async fn channels(&self) -> GatewayResult<Vec<Channel>> {
            Ok(Vec::new())
        }
        async fn users(&self) -> GatewayResult<Vec<UserProfile>> {
            Ok(Vec::new())
        }
        async fn user_info(&self, user_id: &str) -> GatewayResult<UserProfile> {
            Ok(UserProfile {
                id: user_id.to_string(),
                name: format!("name-{user_id}"),
                avatar_url: String::new(),
            })
        }
        async fn team_info(&self) -> GatewayResult<TeamProfile> {
            Err(SlackError::Api {
                method: "team.info".to_string(),
                error: "missing_scope".to_string(),
            })
        }
        async fn custom_emoji(&self) -> GatewayResult<HashMap<String, String>> {
            Ok(HashMap::new())
        }
        async fn post_message(&self, post: OutgoingPost) -> GatewayResult<()> {
            self.posts.lock().unwrap().push(post);
            Ok(())
        }
        async fn history(&self, _channel_id: &str, limit: usize) -> GatewayResult<Vec<PlatformMessage>> {
            Ok(self.history.iter().take(limit).cloned().collect())
        }
    }

    fn workspace() -> Arc<WorkspaceInfo> {
        Arc::new(WorkspaceInfo {
            team: TeamProfile {
                name: "Acme".to_string(),
                ..Default::default()
            },
            channels: vec![Channel {
                id: "C1".to_string(),
                name: "general".to_string(),
            }],
            ..Default::default()
        })
    }

    fn start(gateway: Arc<FakeGateway>) -> HubHandle {
        let signer = IdentitySigner::new(SECRET).unwrap();
        let (hub, handle) = RelayHub::new(gateway, signer, HubConfig::default());
        let (ready_tx, ready_rx) = oneshot::channel();
        tokio::spawn(hub.run(ready_rx));
        ready_tx.send(workspace()).unwrap();
        handle
    }

    async fn next(conn: &mut ClientConnection) -> Value {
        let frame = timeout(Duration::from_secs(2), conn.outbound.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("channel closed");
        serde_json::from_slice(&frame).unwrap()
    }

    #[test]
    fn test_resolve_channel() {
        let info = workspace();
        assert_eq!(resolve_channel(&info, "general").unwrap(), "C1");
        assert_eq!(resolve_channel(&info, "C1").unwrap(), "C1");
        assert_eq!(
            resolve_channel(&info, "random"),
            Err(ResolutionError("random".to_string()))
        );
    }

    #[tokio::test]
    async fn test_welcome_falls_back_to_connect_team() {
        let handle = start(Arc::new(FakeGateway::default()));
        let mut conn = handle.connect().await.unwrap();
        let welcome = next(&mut conn).await;
        assert_eq!(welcome["type"], "team-info");
        assert_eq!(welcome["slack"], "Acme");
    }

    #[tokio::test]
    async fn test_auth_issues_identity() {
        let handle = start(Arc::new(FakeGateway::default()));
        let mut conn = handle.connect().await.unwrap();
        next(&mut conn).await;

        handle
            .submit(conn.id, Bytes::from_static(br#"{"type":"auth","token":""}"#))
            .await
            .unwrap();
        let auth = next(&mut conn).await;
        assert_eq!(auth["type"], "auth");
        assert!(auth["warning"].is_null());

        let signer = IdentitySigner::new(SECRET).unwrap();
        let identity = signer.verify(auth["token"].as_str().unwrap()).unwrap();
        assert!(identity.username.starts_with("anonymous-"));
    }

    #[tokio::test]
    async fn test_unauthenticated_send_is_dropped() {
        let gateway = Arc::new(FakeGateway::default());
        let handle = start(gateway.clone());
        let mut conn = handle.connect().await.unwrap();
        next(&mut conn).await;

        handle
            .submit(
                conn.id,
                Bytes::from_static(br#"{"type":"message","channel_id":"general","text":"hi"}"#),
            )
            .await
            .unwrap();
        // a broadcast behind it proves the request was processed
        handle.broadcast(Bytes::from_static(b"{\"marker\":1}\n")).await.unwrap();
        assert_eq!(next(&mut conn).await["marker"], 1);
        assert!(gateway.posts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_previous_messages_oldest_first() {
        let history = (1..=5)
            .rev()
            .map(|n| PlatformMessage {
                user: "U1".to_string(),
                text: format!("m{n}"),
                ts: format!("{n}.0"),
                ..Default::default()
            })
            .collect();
        let gateway = FakeGateway {
            history,
            ..Default::default()
        };

        let frames = previous_messages(&gateway, "C1", 2).await;
        let texts: Vec<String> = frames
            .iter()
            .map(|f| serde_json::from_slice::<Value>(f).unwrap()["text"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(texts, vec!["m4", "m5"]);
        let first: Value = serde_json::from_slice(&frames[0]).unwrap();
        assert_eq!(first["channel"]["id"], "C1");
    }

    #[tokio::test]
    async fn test_hub_reports_upstream_closed() {
        let signer = IdentitySigner::new(SECRET).unwrap();
        let (hub, _handle) = RelayHub::new(Arc::new(FakeGateway::default()), signer, HubConfig::default());
        let (ready_tx, ready_rx) = oneshot::channel::<Arc<WorkspaceInfo>>();
        drop(ready_tx);
        assert!(matches!(hub.run(ready_rx).await, Err(HubError::UpstreamClosed)));
    }
}
