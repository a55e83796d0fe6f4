//! WebSocket message types for the client wire protocol.
//!
//! Clients send flat JSON objects tagged by `type`; the server answers with
//! newline-terminated JSON frames.

use bytes::Bytes;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use thiserror::Error;

use crate::slack::{Channel, UserProfile};

/// An encoded server frame, ready to write to a client.
pub type Frame = Bytes;

/// History size used when a client does not ask for one.
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

/// Largest history a client may request.
pub const MAX_HISTORY_LIMIT: usize = 1000;

// ============================================================================
// Requests (Client -> Server)
// ============================================================================

/// A decoded client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundRequest {
    /// Present a token, or an empty string to ask for a new identity.
    Authenticate { token: String },
    /// Post `text` to a channel given by id or name.
    SendMessage { channel: String, text: String },
    /// Replay the most recent messages of a channel.
    FetchHistory { channel: String, limit: usize },
}

/// Why a client frame was rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// Not a JSON object.
    #[error("malformed client message: {0}")]
    Malformed(String),

    /// `type` missing or not one we know.
    #[error("unknown message type {0:?} received")]
    UnknownType(String),

    /// Required field missing or empty.
    #[error("invalid client message received: missing {0}")]
    MissingField(&'static str),

    /// Field present with a value of the wrong shape.
    #[error("invalid client message received: {field} must be a string")]
    InvalidField { field: String },

    /// `limit` not an integer in range.
    #[error("invalid client message received: limit has incorrect bounds ({0})")]
    LimitOutOfRange(String),
}

/// Decode a raw client frame.
///
/// Pure: never touches hub state.
pub fn decode_inbound(raw: &[u8]) -> Result<InboundRequest, DecodeError> {
    let fields: Map<String, Value> =
        serde_json::from_slice(raw).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let kind = string_field(&fields, "type")?.unwrap_or_default();
    match kind.as_str() {
        "auth" => Ok(InboundRequest::Authenticate {
            token: string_field(&fields, "token")?.unwrap_or_default(),
        }),
        "message" => {
            let channel = required_field(&fields, "channel_id")?;
            let text = required_field(&fields, "text")?;
            Ok(InboundRequest::SendMessage { channel, text })
        }
        "history" => {
            let channel = required_field(&fields, "channel_id")?;
            let limit = match string_field(&fields, "limit")? {
                Some(raw) if !raw.is_empty() => parse_limit(&raw)?,
                _ => DEFAULT_HISTORY_LIMIT,
            };
            Ok(InboundRequest::FetchHistory { channel, limit })
        }
        _ => Err(DecodeError::UnknownType(kind)),
    }
}

/// Read a field as text. Numbers are accepted and rendered; null is absent.
fn string_field(fields: &Map<String, Value>, name: &str) -> Result<Option<String>, DecodeError> {
    match fields.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(_) => Err(DecodeError::InvalidField {
            field: name.to_string(),
        }),
    }
}

fn required_field(fields: &Map<String, Value>, name: &'static str) -> Result<String, DecodeError> {
    match string_field(fields, name)? {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(DecodeError::MissingField(name)),
    }
}

fn parse_limit(raw: &str) -> Result<usize, DecodeError> {
    match raw.trim().parse::<i64>() {
        Ok(limit) if limit > 0 && limit as usize <= MAX_HISTORY_LIMIT => Ok(limit as usize),
        _ => Err(DecodeError::LimitOutOfRange(raw.to_string())),
    }
}

// ============================================================================
// Frames (Server -> Client)
// ============================================================================

/// Frames sent from the relay to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerFrame {
    /// Identity issued or confirmed.
    Auth {
        token: String,
        /// Set only when a presented token was replaced.
        warning: Option<String>,
    },

    /// Welcome payload, first frame on every connection.
    TeamInfo {
        /// Team name.
        slack: String,
        /// Team icon URL.
        icon: String,
        users: Vec<WireUser>,
        channels: Vec<WireChannel>,
        emoji: HashMap<String, String>,
    },

    /// A relayed chat message.
    Message {
        ts: String,
        text: String,
        channel: WireChannel,
        #[serde(skip_serializing_if = "Option::is_none")]
        user: Option<WireUser>,
    },
}

/// Channel as seen by clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WireChannel {
    pub id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
}

impl From<&Channel> for WireChannel {
    fn from(channel: &Channel) -> Self {
        Self {
            id: channel.id.clone(),
            name: channel.name.clone(),
        }
    }
}

/// User as seen by clients. Only public profile fields are exposed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WireUser {
    pub id: String,
    pub username: String,
    pub avatar_url: String,
}

impl From<&UserProfile> for WireUser {
    fn from(user: &UserProfile) -> Self {
        Self {
            id: user.id.clone(),
            username: user.name.clone(),
            avatar_url: user.avatar_url.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(value: Value) -> Result<InboundRequest, DecodeError> {
        decode_inbound(value.to_string().as_bytes())
    }

    #[test]
    fn test_decode_auth() {
        assert_eq!(
            decode(json!({ "type": "auth", "token": "" })).unwrap(),
            InboundRequest::Authenticate {
                token: String::new()
            }
        );
        assert_eq!(
            decode(json!({ "type": "auth" })).unwrap(),
            InboundRequest::Authenticate {
                token: String::new()
            }
        );
        assert_eq!(
            decode(json!({ "type": "auth", "token": "abc" })).unwrap(),
            InboundRequest::Authenticate {
                token: "abc".to_string()
            }
        );
    }

    #[test]
    fn test_decode_message() {
        assert_eq!(
            decode(json!({ "type": "message", "channel_id": "general", "text": "hi" })).unwrap(),
            InboundRequest::SendMessage {
                channel: "general".to_string(),
                text: "hi".to_string()
            }
        );
        assert_eq!(
            decode(json!({ "type": "message", "channel_id": "", "text": "hi" })),
            Err(DecodeError::MissingField("channel_id"))
        );
        assert_eq!(
            decode(json!({ "type": "message", "channel_id": "general" })),
            Err(DecodeError::MissingField("text"))
        );
    }

    #[test]
    fn test_decode_history_limit_bounds() {
        assert!(matches!(
            decode(json!({ "type": "history", "channel_id": "c1", "limit": "0" })),
            Err(DecodeError::LimitOutOfRange(_))
        ));
        assert!(matches!(
            decode(json!({ "type": "history", "channel_id": "c1", "limit": "1001" })),
            Err(DecodeError::LimitOutOfRange(_))
        ));
        assert!(matches!(
            decode(json!({ "type": "history", "channel_id": "c1", "limit": "-5" })),
            Err(DecodeError::LimitOutOfRange(_))
        ));
        assert!(matches!(
            decode(json!({ "type": "history", "channel_id": "c1", "limit": "ten" })),
            Err(DecodeError::LimitOutOfRange(_))
        ));
        assert_eq!(
            decode(json!({ "type": "history", "channel_id": "c1", "limit": "1000" })).unwrap(),
            InboundRequest::FetchHistory {
                channel: "c1".to_string(),
                limit: 1000
            }
        );
        assert_eq!(
            decode(json!({ "type": "history", "channel_id": "c1", "limit": 25 })).unwrap(),
            InboundRequest::FetchHistory {
                channel: "c1".to_string(),
                limit: 25
            }
        );
    }

    #[test]
    fn test_decode_history_default_limit() {
        assert_eq!(
            decode(json!({ "type": "history", "channel_id": "c1" })).unwrap(),
            InboundRequest::FetchHistory {
                channel: "c1".to_string(),
                limit: DEFAULT_HISTORY_LIMIT
            }
        );
        assert_eq!(
            decode(json!({ "type": "history", "channel_id": "c1", "limit": "" })).unwrap(),
            InboundRequest::FetchHistory {
                channel: "c1".to_string(),
                limit: DEFAULT_HISTORY_LIMIT
            }
        );
    }

    #[test]
    fn test_decode_rejects_unknown_and_malformed() {
        assert_eq!(
            decode(json!({ "type": "subscribe" })),
            Err(DecodeError::UnknownType("subscribe".to_string()))
        );
        assert_eq!(
            decode(json!({ "channel_id": "c1" })),
            Err(DecodeError::UnknownType(String::new()))
        );
        assert!(matches!(
            decode_inbound(b"not json"),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(
            decode_inbound(b"[1,2,3]"),
            Err(DecodeError::Malformed(_))
        ));
        assert_eq!(
            decode(json!({ "type": "message", "channel_id": ["c1"], "text": "hi" })),
            Err(DecodeError::InvalidField {
                field: "channel_id".to_string()
            })
        );
    }

    #[test]
    fn test_auth_frame_shape() {
        let frame = ServerFrame::Auth {
            token: "t".to_string(),
            warning: None,
        };
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({ "type": "auth", "token": "t", "warning": null })
        );
    }

    #[test]
    fn test_message_frame_omits_missing_user() {
        let frame = ServerFrame::Message {
            ts: "1.0".to_string(),
            text: "hi".to_string(),
            channel: WireChannel {
                id: "C1".to_string(),
                name: String::new(),
            },
            user: None,
        };
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({ "type": "message", "ts": "1.0", "text": "hi", "channel": { "id": "C1" } })
        );
    }
}
