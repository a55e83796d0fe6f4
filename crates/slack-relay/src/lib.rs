//! Slack relay.
//!
//! Relays the messages of a Slack workspace to anonymous websocket clients
//! and posts their replies back under generated display names.

pub mod api;
pub mod auth;
pub mod settings;
pub mod slack;
pub mod wordlist;
pub mod ws;
