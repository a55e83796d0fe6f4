//! Application state shared across handlers.

use std::path::PathBuf;

use crate::ws::HubHandle;

/// Application state shared across all handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Handle to the relay hub.
    pub hub: HubHandle,
    /// Directory holding `index.html` and the `static/` assets.
    pub static_dir: PathBuf,
}

impl AppState {
    pub fn new(hub: HubHandle, static_dir: impl Into<PathBuf>) -> Self {
        Self {
            hub,
            static_dir: static_dir.into(),
        }
    }
}
