//! Outbound frame encoding and the relay filter.

use bytes::{BufMut, BytesMut};
use log::debug;
use std::collections::HashMap;

use super::types::{Frame, ServerFrame, WireChannel, WireUser};
use crate::slack::{Channel, PlatformGateway, PlatformMessage, TeamProfile, UserProfile, avatar_url};

/// Whether a platform message should reach clients.
///
/// Organic messages and bot messages with text and a timestamp pass; edits,
/// joins and every other subtype are dropped.
pub fn is_relayable(message: &PlatformMessage) -> bool {
    (message.subtype.is_empty() || message.is_bot())
        && !message.text.is_empty()
        && !message.ts.is_empty()
}

/// Serialize a frame as a single newline-terminated JSON line.
pub fn encode_frame(frame: &ServerFrame) -> Result<Frame, serde_json::Error> {
    let mut buf = BytesMut::with_capacity(256).writer();
    serde_json::to_writer(&mut buf, frame)?;
    let mut buf = buf.into_inner();
    buf.put_u8(b'\n');
    Ok(buf.freeze())
}

/// Encode the reply to an authentication request.
pub fn encode_auth(token: &str, warning: Option<&str>) -> Result<Frame, serde_json::Error> {
    encode_frame(&ServerFrame::Auth {
        token: token.to_string(),
        warning: warning.map(str::to_string),
    })
}

/// Encode the welcome frame sent to every new client.
pub fn encode_welcome(
    team: &TeamProfile,
    channels: &[Channel],
    users: &[UserProfile],
    emoji: &HashMap<String, String>,
) -> Result<Frame, serde_json::Error> {
    encode_frame(&ServerFrame::TeamInfo {
        slack: team.name.clone(),
        icon: team.icon_url.clone(),
        users: users.iter().map(WireUser::from).collect(),
        channels: channels.iter().map(WireChannel::from).collect(),
        emoji: emoji.clone(),
    })
}

/// Build the message frame for a platform message and its resolved author.
pub fn message_frame(message: &PlatformMessage, user: Option<WireUser>) -> ServerFrame {
    ServerFrame::Message {
        ts: message.ts.clone(),
        text: message.text.clone(),
        channel: WireChannel {
            id: message.channel.clone(),
            name: String::new(),
        },
        user,
    }
}

/// Encode a platform message, resolving its author through the gateway.
///
/// Bot messages carry their own display name and get a generated avatar.
/// Organic messages whose author cannot be looked up are sent without a
/// `user` field.
pub async fn encode_message<G>(
    message: &PlatformMessage,
    gateway: &G,
) -> Result<Frame, serde_json::Error>
where
    G: PlatformGateway + ?Sized,
{
    let user = if message.is_bot() {
        Some(WireUser {
            id: String::new(),
            username: message.username.clone(),
            avatar_url: avatar_url(&message.username),
        })
    } else {
        match gateway.user_info(&message.user).await {
            Ok(profile) => Some(WireUser::from(&profile)),
            Err(e) => {
                debug!("could not resolve author {} of {}: {}", message.user, message.ts, e);
                None
            }
        }
    };

    encode_frame(&message_frame(message, user))
}
