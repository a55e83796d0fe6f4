//! Slack platform types.
//!
//! These are the relay's view of the platform. Raw API payloads are mapped
//! into them by the client; everything downstream only sees these.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Message subtype Slack uses for integrations and bots.
pub const BOT_MESSAGE_SUBTYPE: &str = "bot_message";

/// A public channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
}

/// A workspace member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    /// Best available profile image.
    #[serde(default)]
    pub avatar_url: String,
}

/// Team metadata shown in the welcome frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamProfile {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub domain: String,
    /// 88px team icon.
    #[serde(default)]
    pub icon_url: String,
}

/// The bot user the relay is connected as.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelfProfile {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// Workspace snapshot captured when the event stream connects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkspaceInfo {
    pub team: TeamProfile,
    pub self_user: SelfProfile,
    pub channels: Vec<Channel>,
    pub users: Vec<UserProfile>,
}

impl WorkspaceInfo {
    /// Match a caller-supplied reference against channel names and ids.
    ///
    /// Exact matches only; returns the canonical channel id.
    pub fn resolve_channel(&self, id_or_name: &str) -> Option<&str> {
        self.channels
            .iter()
            .find(|c| c.name == id_or_name || c.id == id_or_name)
            .map(|c| c.id.as_str())
    }
}

/// A chat message as delivered by the event stream or history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformMessage {
    /// Channel id. History responses leave this empty.
    pub channel: String,
    /// Author user id (organic messages).
    pub user: String,
    /// Author display name (bot messages).
    pub username: String,
    pub text: String,
    pub ts: String,
    /// Empty for organic messages.
    pub subtype: String,
}

impl PlatformMessage {
    pub fn is_bot(&self) -> bool {
        self.subtype == BOT_MESSAGE_SUBTYPE
    }
}

/// Events read from the platform event stream.
#[derive(Debug, Clone)]
pub enum PlatformEvent {
    /// The stream (re)connected. `connection_count` starts at 1.
    Connected {
        info: Arc<WorkspaceInfo>,
        connection_count: u32,
    },
    /// A message was posted somewhere the bot can see.
    Message(PlatformMessage),
    /// The platform rejected our credentials.
    InvalidAuth,
    /// Anything else, by event type.
    Other(String),
}

/// A message posted on behalf of an anonymous client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingPost {
    pub channel_id: String,
    pub text: String,
    /// Display name shown in Slack.
    pub username: String,
    pub icon_url: String,
}
