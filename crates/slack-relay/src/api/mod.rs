//! HTTP API module.
//!
//! Serves the websocket stream, the health endpoint and the bundled web UI.

pub mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
