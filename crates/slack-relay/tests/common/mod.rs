//! Test utilities and common setup.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::timeout;

use slack_relay::auth::IdentitySigner;
use slack_relay::slack::{
    Channel, GatewayResult, OutgoingPost, PlatformGateway, PlatformMessage, SlackError,
    TeamProfile, UserProfile, WorkspaceInfo,
};
use slack_relay::ws::{ClientConnection, HubConfig, HubHandle, RelayHub};

/// Secret shared by every test hub.
pub const TEST_SECRET: &str = "test-secret-for-integration-tests";

/// In-memory gateway that records what the hub asks of it.
#[derive(Default)]
pub struct RecordingGateway {
    /// Newest first, like the real API.
    pub history: Vec<PlatformMessage>,
    pub posts: Mutex<Vec<OutgoingPost>>,
    pub history_requests: Mutex<Vec<(String, usize)>>,
}

impl RecordingGateway {
    pub fn with_history(history: Vec<PlatformMessage>) -> Self {
        Self {
            history,
            ..Default::default()
        }
    }

    pub fn posts(&self) -> Vec<OutgoingPost> {
        self.posts.lock().unwrap().clone()
    }
}

#[async_trait]
impl PlatformGateway for RecordingGateway {
    async fn channels(&self) -> GatewayResult<Vec<Channel>> {
        Ok(workspace().channels)
    }

    async fn users(&self) -> GatewayResult<Vec<UserProfile>> {
        Ok(workspace().users)
    }

    async fn user_info(&self, user_id: &str) -> GatewayResult<UserProfile> {
        workspace()
            .users
            .into_iter()
            .find(|u| u.id == user_id)
            .ok_or_else(|| SlackError::Api {
                method: "users.info".to_string(),
                error: "user_not_found".to_string(),
            })
    }

    async fn team_info(&self) -> GatewayResult<TeamProfile> {
        Ok(workspace().team)
    }

    async fn custom_emoji(&self) -> GatewayResult<HashMap<String, String>> {
        Ok(HashMap::from([(
            "shipit".to_string(),
            "https://emoji.example/shipit.png".to_string(),
        )]))
    }

    async fn post_message(&self, post: OutgoingPost) -> GatewayResult<()> {
        self.posts.lock().unwrap().push(post);
        Ok(())
    }

    async fn history(&self, channel_id: &str, limit: usize) -> GatewayResult<Vec<PlatformMessage>> {
        self.history_requests
            .lock()
            .unwrap()
            .push((channel_id.to_string(), limit));
        Ok(self.history.iter().take(limit).cloned().collect())
    }
}

/// The workspace every test hub runs against.
pub fn workspace() -> WorkspaceInfo {
    WorkspaceInfo {
        team: TeamProfile {
            id: "T1".to_string(),
            name: "Acme".to_string(),
            domain: "acme".to_string(),
            icon_url: "https://img.example/acme.png".to_string(),
        },
        channels: vec![
            Channel {
                id: "C1".to_string(),
                name: "general".to_string(),
            },
            Channel {
                id: "C2".to_string(),
                name: "random".to_string(),
            },
        ],
        users: vec![UserProfile {
            id: "U1".to_string(),
            name: "ada".to_string(),
            avatar_url: "https://img.example/ada.png".to_string(),
        }],
        ..Default::default()
    }
}

pub fn signer() -> IdentitySigner {
    IdentitySigner::new(TEST_SECRET).unwrap()
}

/// Start a running hub backed by `gateway`.
pub fn start_hub(gateway: Arc<RecordingGateway>, config: HubConfig) -> HubHandle {
    let (hub, handle) = RelayHub::new(gateway, signer(), config);
    let (ready_tx, ready_rx) = oneshot::channel();
    tokio::spawn(hub.run(ready_rx));
    ready_tx.send(Arc::new(workspace())).unwrap();
    handle
}

/// Connect and consume the welcome frame.
pub async fn connect(handle: &HubHandle) -> (ClientConnection, Value) {
    let mut conn = handle.connect().await.unwrap();
    let welcome = next_frame(&mut conn).await;
    assert_eq!(welcome["type"], "team-info");
    (conn, welcome)
}

/// Wait for the next frame on a connection.
pub async fn next_frame(conn: &mut ClientConnection) -> Value {
    let frame = timeout(Duration::from_secs(2), conn.outbound.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("connection closed");
    assert_eq!(frame.last(), Some(&b'\n'), "frames are newline terminated");
    serde_json::from_slice(&frame).unwrap()
}

/// Poll until `check` holds or two seconds pass.
pub async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

pub fn organic(n: u32) -> PlatformMessage {
    PlatformMessage {
        user: "U1".to_string(),
        text: format!("m{n}"),
        ts: format!("{n}.000100"),
        ..Default::default()
    }
}
