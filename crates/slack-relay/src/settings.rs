//! Application configuration.
//!
//! Values are layered: built-in defaults, then the TOML config file, then
//! `SLACK_RELAY__SECTION__KEY` environment variables, then the legacy
//! single-word variables (`SLACK_TOKEN`, `JWT_SECRET`, `PORT`,
//! `LOG_MESSAGES`, `HEROKU_APP_DOMAIN`).

use ::config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

use crate::slack::DEFAULT_API_BASE_URL;
use crate::ws::HubConfig;
use crate::ws::hub::{DEFAULT_CLIENT_BUFFER, DEFAULT_INBOUND_BUFFER};

/// Application name, used for config paths and the env prefix.
pub const APP_NAME: &str = "slack-relay";

/// Placeholder shown instead of secrets.
const REDACTED: &str = "********";

/// Legacy variable names and the keys they override.
const LEGACY_ENV: &[(&str, &str)] = &[
    ("SLACK_TOKEN", "slack.token"),
    ("JWT_SECRET", "server.jwt_secret"),
    ("PORT", "server.port"),
    ("LOG_MESSAGES", "server.log_messages"),
    ("HEROKU_APP_DOMAIN", "server.domain"),
];

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub slack: SlackConfig,
    pub server: ServerConfig,
    pub hub: HubSettings,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlackConfig {
    /// Bot token with RTM, chat:write.customize, channels, users, team and
    /// emoji read scopes.
    pub token: String,
    pub api_base_url: String,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Public domain the UI is served from.
    pub domain: String,
    /// HMAC secret for identity tokens.
    pub jwt_secret: String,
    /// Log every platform message at info level.
    pub log_messages: bool,
    /// Directory holding `index.html` and `static/`.
    pub static_dir: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            domain: "localhost".to_string(),
            jwt_secret: String::new(),
            log_messages: false,
            static_dir: "ui/build".to_string(),
        }
    }
}

/// Channel sizing for the relay hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubSettings {
    /// Frames a client may lag behind before it is dropped.
    pub client_buffer: usize,
    /// Capacity of each hub input channel.
    pub inbound_buffer: usize,
    /// Capacity of the platform event channel.
    pub event_buffer: usize,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            client_buffer: DEFAULT_CLIENT_BUFFER,
            inbound_buffer: DEFAULT_INBOUND_BUFFER,
            event_buffer: 256,
        }
    }
}

impl From<&HubSettings> for HubConfig {
    fn from(settings: &HubSettings) -> Self {
        Self {
            client_buffer: settings.client_buffer,
            inbound_buffer: settings.inbound_buffer,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load from `path` (optional file) and the process environment.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::load_from(path, std::env::vars().collect())
    }

    /// Load from `path` and an explicit set of environment variables.
    pub fn load_from(path: &Path, env: HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .add_source(
                File::from(path)
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                Environment::with_prefix(&env_prefix())
                    .separator("__")
                    .source(Some(env.clone())),
            );

        for (var, key) in LEGACY_ENV {
            let value = env.get(*var).filter(|v| !v.is_empty()).cloned();
            builder = builder.set_override_option(*key, value)?;
        }

        Ok(builder.build()?.try_deserialize()?)
    }

    /// Reject configurations the server cannot start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.slack.token.trim().is_empty() {
            return Err(ConfigError::Missing("slack.token"));
        }
        if self.server.jwt_secret.is_empty() {
            return Err(ConfigError::Missing("server.jwt_secret"));
        }
        for (field, value) in [
            ("hub.client_buffer", self.hub.client_buffer),
            ("hub.inbound_buffer", self.hub.inbound_buffer),
            ("hub.event_buffer", self.hub.event_buffer),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Copy with secrets masked, for display.
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        mask(&mut config.slack.token);
        mask(&mut config.server.jwt_secret);
        config
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn mask(secret: &mut String) {
    if !secret.is_empty() {
        *secret = REDACTED.to_string();
    }
}

/// Environment prefix derived from the app name (`SLACK_RELAY`).
pub fn env_prefix() -> String {
    APP_NAME
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}
