//! Client registry owned by the relay hub.
//!
//! Not shared: only the hub task touches it, so no locking is involved.
//! Delivery never blocks; a client whose buffer is full is evicted.

use log::{debug, info};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;

use super::types::Frame;
use crate::auth::Identity;

/// Opaque connection identifier, unique for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A sender for encoded frames to a specific client.
pub type FrameSender = mpsc::Sender<Frame>;

/// One live client connection.
#[derive(Debug)]
pub struct ClientSession {
    pub id: ClientId,
    /// Bound by a successful authentication; rebinding replaces it.
    pub identity: Option<Identity>,
    pub outbound: FrameSender,
    /// Dropped with the session; wakes any replay still aimed at it.
    departed: watch::Sender<()>,
}

impl ClientSession {
    pub fn new(id: ClientId, outbound: FrameSender) -> Self {
        let (departed, _) = watch::channel(());
        Self {
            id,
            identity: None,
            outbound,
            departed,
        }
    }
}

/// Delivery path to one client for frames produced off the hub task.
///
/// Holds no strong sender between frames, so unregistering or evicting the
/// session still closes its channel.
#[derive(Debug)]
pub struct ReplayTarget {
    outbound: mpsc::WeakSender<Frame>,
    departed: watch::Receiver<()>,
}

impl ReplayTarget {
    /// Deliver frames in order, waiting for buffer space.
    ///
    /// Stops at the first frame the session can no longer take and returns
    /// how many were delivered.
    pub async fn deliver(mut self, frames: Vec<Frame>) -> usize {
        let mut delivered = 0;
        for frame in frames {
            let Some(outbound) = self.outbound.upgrade() else {
                break;
            };
            tokio::select! {
                biased;

                _ = self.departed.changed() => break,
                sent = outbound.send(frame) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
            delivered += 1;
        }
        delivered
    }
}

/// A frame could not be handed to a client.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryFailure {
    #[error("client {0} outbound buffer is full")]
    Full(ClientId),

    #[error("client {0} disconnected")]
    Closed(ClientId),

    #[error("client {0} is not registered")]
    Unknown(ClientId),
}

/// Live client sessions keyed by id.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: HashMap<ClientId, ClientSession>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.clients.contains_key(&id)
    }

    /// Add a session and enqueue its welcome frame.
    ///
    /// The welcome is queued before the session becomes visible to
    /// broadcasts, so it is always the first frame the client sees. Returns
    /// false if the id is taken or the client is already gone.
    pub fn register(&mut self, session: ClientSession, welcome: &Frame) -> bool {
        let id = session.id;
        if self.clients.contains_key(&id) {
            debug!("client {} already registered", id);
            return false;
        }
        if let Err(e) = session.outbound.try_send(welcome.clone()) {
            info!("client {} went away before welcome: {}", id, describe(&e));
            return false;
        }
        self.clients.insert(id, session);
        info!("registered client {} ({} connected)", id, self.clients.len());
        true
    }

    /// Remove a session. Dropping it closes the client's outbound channel.
    ///
    /// Returns the session if it was present; repeated calls are no-ops.
    pub fn unregister(&mut self, id: ClientId) -> Option<ClientSession> {
        let session = self.clients.remove(&id)?;
        info!("unregistered client {} ({} connected)", id, self.clients.len());
        Some(session)
    }

    /// Bind (or rebind) an identity to a session.
    pub fn bind_identity(&mut self, id: ClientId, identity: Identity) -> bool {
        match self.clients.get_mut(&id) {
            Some(session) => {
                session.identity = Some(identity);
                true
            }
            None => false,
        }
    }

    pub fn identity(&self, id: ClientId) -> Option<&Identity> {
        self.clients.get(&id).and_then(|s| s.identity.as_ref())
    }

    /// Delivery path for frames produced off the hub task.
    pub fn replay_target(&self, id: ClientId) -> Option<ReplayTarget> {
        self.clients.get(&id).map(|s| ReplayTarget {
            outbound: s.outbound.downgrade(),
            departed: s.departed.subscribe(),
        })
    }

    /// Deliver a frame to one client, evicting it on failure.
    pub fn send_to(&mut self, id: ClientId, frame: Frame) -> Result<(), DeliveryFailure> {
        let session = self.clients.get(&id).ok_or(DeliveryFailure::Unknown(id))?;
        match session.outbound.try_send(frame) {
            Ok(()) => Ok(()),
            Err(e) => {
                let failure = failure_for(id, &e);
                self.unregister(id);
                Err(failure)
            }
        }
    }

    /// Deliver a frame to every client without blocking.
    ///
    /// Clients that cannot accept it are evicted; their ids are returned.
    pub fn broadcast(&mut self, frame: &Frame) -> Vec<ClientId> {
        let mut evicted = Vec::new();
        for (id, session) in &self.clients {
            if let Err(e) = session.outbound.try_send(frame.clone()) {
                debug!("dropping client {}: {}", id, describe(&e));
                evicted.push(*id);
            }
        }
        for id in &evicted {
            self.unregister(*id);
        }
        evicted
    }
}

fn failure_for(id: ClientId, err: &TrySendError<Frame>) -> DeliveryFailure {
    match err {
        TrySendError::Full(_) => DeliveryFailure::Full(id),
        TrySendError::Closed(_) => DeliveryFailure::Closed(id),
    }
}

fn describe(err: &TrySendError<Frame>) -> &'static str {
    match err {
        TrySendError::Full(_) => "buffer full",
        TrySendError::Closed(_) => "channel closed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn session(id: u64, capacity: usize) -> (ClientSession, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity);
        (ClientSession::new(ClientId(id), tx), rx)
    }

    fn welcome() -> Frame {
        Bytes::from_static(b"{\"type\":\"team-info\"}\n")
    }

    #[test]
    fn test_register_enqueues_welcome_first() {
        let mut registry = ClientRegistry::new();
        let (s, mut rx) = session(1, 4);
        assert!(registry.register(s, &welcome()));

        registry.broadcast(&Bytes::from_static(b"m1\n"));
        assert_eq!(rx.try_recv().unwrap(), welcome());
        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"m1\n"));
    }

    #[test]
    fn test_register_duplicate_and_gone() {
        let mut registry = ClientRegistry::new();
        let (s, _rx) = session(1, 4);
        assert!(registry.register(s, &welcome()));
        let (dup, _rx2) = session(1, 4);
        assert!(!registry.register(dup, &welcome()));

        let (gone, rx3) = session(2, 4);
        drop(rx3);
        assert!(!registry.register(gone, &welcome()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unregister_is_idempotent_and_closes_channel() {
        let mut registry = ClientRegistry::new();
        let (s, mut rx) = session(1, 4);
        registry.register(s, &welcome());

        assert!(registry.unregister(ClientId(1)).is_some());
        assert!(registry.unregister(ClientId(1)).is_none());
        assert!(registry.is_empty());

        assert_eq!(rx.try_recv().unwrap(), welcome());
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_broadcast_evicts_saturated_client() {
        let mut registry = ClientRegistry::new();
        let (slow, _slow_rx) = session(1, 1);
        let (fast, mut fast_rx) = session(2, 8);
        registry.register(slow, &welcome());
        registry.register(fast, &welcome());

        // slow's single slot holds the welcome
        let evicted = registry.broadcast(&Bytes::from_static(b"m1\n"));
        assert_eq!(evicted, vec![ClientId(1)]);
        assert!(!registry.contains(ClientId(1)));
        assert!(registry.contains(ClientId(2)));

        assert_eq!(fast_rx.try_recv().unwrap(), welcome());
        assert_eq!(fast_rx.try_recv().unwrap(), Bytes::from_static(b"m1\n"));
    }

    #[test]
    fn test_send_to_failures() {
        let mut registry = ClientRegistry::new();
        assert_eq!(
            registry.send_to(ClientId(9), welcome()),
            Err(DeliveryFailure::Unknown(ClientId(9)))
        );

        let (s, rx) = session(1, 4);
        registry.register(s, &welcome());
        drop(rx);
        assert_eq!(
            registry.send_to(ClientId(1), welcome()),
            Err(DeliveryFailure::Closed(ClientId(1)))
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_bind_identity_replaces() {
        let mut registry = ClientRegistry::new();
        let (s, _rx) = session(1, 4);
        registry.register(s, &welcome());
        assert!(registry.identity(ClientId(1)).is_none());

        assert!(registry.bind_identity(ClientId(1), Identity::new("anonymous-fox-1")));
        assert!(registry.bind_identity(ClientId(1), Identity::new("anonymous-owl-2")));
        assert_eq!(
            registry.identity(ClientId(1)).map(|i| i.username.as_str()),
            Some("anonymous-owl-2")
        );
        assert!(!registry.bind_identity(ClientId(2), Identity::new("x")));
    }

    #[tokio::test]
    async fn test_replay_stops_when_session_evicted() {
        let mut registry = ClientRegistry::new();
        let (s, mut rx) = session(1, 2);
        registry.register(s, &welcome());
        let target = registry.replay_target(ClientId(1)).unwrap();

        let frames = (1..=5).map(|n| Bytes::from(format!("h{n}\n"))).collect();
        let replay = tokio::spawn(target.deliver(frames));

        // welcome + h1 fill the buffer; the replay now waits for room
        while rx.len() < 2 {
            tokio::task::yield_now().await;
        }
        assert_eq!(registry.broadcast(&Bytes::from_static(b"m1\n")), vec![ClientId(1)]);

        assert_eq!(replay.await.unwrap(), 1);
        assert_eq!(rx.recv().await.unwrap(), welcome());
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"h1\n"));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_replay_delivers_in_order() {
        let mut registry = ClientRegistry::new();
        let (s, mut rx) = session(1, 8);
        registry.register(s, &welcome());
        let target = registry.replay_target(ClientId(1)).unwrap();
        assert!(registry.replay_target(ClientId(2)).is_none());

        let frames = vec![Bytes::from_static(b"h1\n"), Bytes::from_static(b"h2\n")];
        assert_eq!(target.deliver(frames).await, 2);
        assert_eq!(rx.recv().await.unwrap(), welcome());
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"h1\n"));
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"h2\n"));
    }
}
