//! Slack platform gateway.
//!
//! Provides the Web API client used for request/response calls and the RTM
//! adapter that supplies the live event stream.

mod client;
mod error;
mod rtm;
mod types;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

pub use client::{DEFAULT_API_BASE_URL, RtmConnect, SlackClient};
pub use error::{GatewayResult, SlackError};
pub use rtm::RtmSource;
pub use types::*;

/// Request/response operations the relay needs from the platform.
///
/// Abstracted for testability; [`SlackClient`] is the production
/// implementation.
#[async_trait]
pub trait PlatformGateway: Send + Sync {
    async fn channels(&self) -> GatewayResult<Vec<Channel>>;
    async fn users(&self) -> GatewayResult<Vec<UserProfile>>;
    async fn user_info(&self, user_id: &str) -> GatewayResult<UserProfile>;
    async fn team_info(&self) -> GatewayResult<TeamProfile>;
    async fn custom_emoji(&self) -> GatewayResult<HashMap<String, String>>;
    async fn post_message(&self, post: OutgoingPost) -> GatewayResult<()>;
    /// Up to `limit` messages, newest first.
    async fn history(&self, channel_id: &str, limit: usize) -> GatewayResult<Vec<PlatformMessage>>;
}

#[async_trait]
impl PlatformGateway for SlackClient {
    async fn channels(&self) -> GatewayResult<Vec<Channel>> {
        self.list_channels().await
    }

    async fn users(&self) -> GatewayResult<Vec<UserProfile>> {
        self.list_users().await
    }

    async fn user_info(&self, user_id: &str) -> GatewayResult<UserProfile> {
        self.get_user_info(user_id).await
    }

    async fn team_info(&self) -> GatewayResult<TeamProfile> {
        self.get_team_info().await
    }

    async fn custom_emoji(&self) -> GatewayResult<HashMap<String, String>> {
        self.get_emoji().await
    }

    async fn post_message(&self, post: OutgoingPost) -> GatewayResult<()> {
        SlackClient::post_message(self, &post).await
    }

    async fn history(&self, channel_id: &str, limit: usize) -> GatewayResult<Vec<PlatformMessage>> {
        self.get_history(channel_id, limit).await
    }
}

/// Deterministic avatar for a display name.
///
/// Gravatar accepts SHA-256 hashes; names that are not registered emails
/// get a generated retro image.
pub fn avatar_url(name: &str) -> String {
    let digest = Sha256::digest(name.as_bytes());
    format!("https://www.gravatar.com/avatar/{}?d=retro", hex::encode(digest))
}
