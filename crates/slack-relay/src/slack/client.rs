//! Slack Web API client.

use log::debug;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use super::error::{GatewayResult, SlackError};
use super::types::{Channel, OutgoingPost, PlatformMessage, SelfProfile, TeamProfile, UserProfile};

/// Default Slack Web API base URL.
pub const DEFAULT_API_BASE_URL: &str = "https://slack.com/api";

/// Page size for cursor-paginated list calls.
const PAGE_SIZE: usize = 200;

/// Client for communicating with the Slack Web API.
#[derive(Debug, Clone)]
pub struct SlackClient {
    /// HTTP client.
    client: Client,
    /// Base URL (e.g., "https://slack.com/api").
    base_url: String,
    /// Bot token.
    token: String,
}

/// Result of `rtm.connect`.
#[derive(Debug, Clone, Deserialize)]
pub struct RtmConnect {
    /// Websocket URL for this session.
    pub url: String,
    #[serde(default)]
    pub team: TeamProfile,
    #[serde(rename = "self", default)]
    pub self_user: SelfProfile,
}

#[derive(Debug, Deserialize)]
struct RawUser {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    deleted: bool,
    #[serde(default)]
    profile: RawUserProfile,
}

#[derive(Debug, Default, Deserialize)]
struct RawUserProfile {
    image_original: Option<String>,
    image_192: Option<String>,
    image_72: Option<String>,
}

impl From<RawUser> for UserProfile {
    fn from(raw: RawUser) -> Self {
        let profile = raw.profile;
        let avatar_url = profile
            .image_original
            .or(profile.image_192)
            .or(profile.image_72)
            .unwrap_or_default();
        Self {
            id: raw.id,
            name: raw.name,
            avatar_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawTeam {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    domain: String,
    #[serde(default)]
    icon: HashMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ChannelPage {
    #[serde(default)]
    channels: Vec<Channel>,
    #[serde(default)]
    response_metadata: ResponseMetadata,
}

#[derive(Debug, Deserialize)]
struct MemberPage {
    #[serde(default)]
    members: Vec<RawUser>,
    #[serde(default)]
    response_metadata: ResponseMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: String,
}

#[derive(Debug, Deserialize)]
struct UserInfoResponse {
    user: RawUser,
}

#[derive(Debug, Deserialize)]
struct TeamInfoResponse {
    team: RawTeam,
}

#[derive(Debug, Deserialize)]
struct EmojiResponse {
    #[serde(default)]
    emoji: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    #[serde(default)]
    messages: Vec<PlatformMessage>,
}

impl SlackClient {
    /// Create a new Slack client.
    pub fn new(token: impl Into<String>, base_url: impl Into<String>) -> GatewayResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(SlackError::Client)?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    /// Base URL this client talks to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Open an RTM session and return its websocket URL.
    pub async fn rtm_connect(&self) -> GatewayResult<RtmConnect> {
        self.call("rtm.connect", &[]).await
    }

    /// List public, unarchived channels.
    pub async fn list_channels(&self) -> GatewayResult<Vec<Channel>> {
        let mut channels = Vec::new();
        let mut cursor = String::new();
        loop {
            let page: ChannelPage = self
                .call(
                    "conversations.list",
                    &[
                        ("types", "public_channel".to_string()),
                        ("exclude_archived", "true".to_string()),
                        ("limit", PAGE_SIZE.to_string()),
                        ("cursor", cursor.clone()),
                    ],
                )
                .await?;
            channels.extend(page.channels);
            cursor = page.response_metadata.next_cursor;
            if cursor.is_empty() {
                return Ok(channels);
            }
        }
    }

    /// List active workspace members.
    pub async fn list_users(&self) -> GatewayResult<Vec<UserProfile>> {
        let mut users = Vec::new();
        let mut cursor = String::new();
        loop {
            let page: MemberPage = self
                .call(
                    "users.list",
                    &[
                        ("limit", PAGE_SIZE.to_string()),
                        ("cursor", cursor.clone()),
                    ],
                )
                .await?;
            users.extend(
                page.members
                    .into_iter()
                    .filter(|m| !m.deleted)
                    .map(UserProfile::from),
            );
            cursor = page.response_metadata.next_cursor;
            if cursor.is_empty() {
                return Ok(users);
            }
        }
    }

    /// Look up a single user.
    pub async fn get_user_info(&self, user_id: &str) -> GatewayResult<UserProfile> {
        let response: UserInfoResponse = self
            .call("users.info", &[("user", user_id.to_string())])
            .await?;
        Ok(response.user.into())
    }

    /// Fetch team name and icon.
    pub async fn get_team_info(&self) -> GatewayResult<TeamProfile> {
        let response: TeamInfoResponse = self.call("team.info", &[]).await?;
        let team = response.team;
        let icon_url = team
            .icon
            .get("image_88")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(TeamProfile {
            id: team.id,
            name: team.name,
            domain: team.domain,
            icon_url,
        })
    }

    /// Fetch custom emoji (name -> image URL or alias).
    pub async fn get_emoji(&self) -> GatewayResult<HashMap<String, String>> {
        let response: EmojiResponse = self.call("emoji.list", &[]).await?;
        Ok(response.emoji)
    }

    /// Post a message under a custom display name and icon.
    pub async fn post_message(&self, post: &OutgoingPost) -> GatewayResult<()> {
        let _: Value = self
            .call(
                "chat.postMessage",
                &[
                    ("channel", post.channel_id.clone()),
                    ("text", post.text.clone()),
                    ("username", post.username.clone()),
                    ("icon_url", post.icon_url.clone()),
                    ("as_user", "false".to_string()),
                ],
            )
            .await?;
        Ok(())
    }

    /// Fetch up to `limit` messages of a channel, newest first.
    pub async fn get_history(
        &self,
        channel_id: &str,
        limit: usize,
    ) -> GatewayResult<Vec<PlatformMessage>> {
        let response: HistoryResponse = self
            .call(
                "conversations.history",
                &[
                    ("channel", channel_id.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;
        Ok(response.messages)
    }

    /// Invoke a Web API method and unwrap the `{ok, error}` envelope.
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &[(&str, String)],
    ) -> GatewayResult<T> {
        let url = format!("{}/{}", self.base_url, method);
        let params: Vec<(&str, &str)> = params
            .iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(key, value)| (*key, value.as_str()))
            .collect();

        debug!("slack api call {}", method);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .form(&params)
            .send()
            .await
            .map_err(|e| SlackError::Http {
                method: method.to_string(),
                source: e,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SlackError::Api {
                method: method.to_string(),
                error: format!("http status {}", status),
            });
        }

        let body: Value = response.json().await.map_err(|e| SlackError::Parse {
            method: method.to_string(),
            message: e.to_string(),
        })?;
        unwrap_envelope(method, body)
    }
}

/// Check `ok` and decode the payload of a Web API response.
fn unwrap_envelope<T: DeserializeOwned>(method: &str, body: Value) -> GatewayResult<T> {
    if !body.get("ok").and_then(Value::as_bool).unwrap_or(false) {
        let error = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error")
            .to_string();
        return Err(SlackError::Api {
            method: method.to_string(),
            error,
        });
    }

    serde_json::from_value(body).map_err(|e| SlackError::Parse {
        method: method.to_string(),
        message: e.to_string(),
    })
}
