//! API route definitions.

use axum::{Router, routing::get};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use super::handlers;
use super::state::AppState;
use crate::ws;

/// Create the application router.
///
/// `/static` serves assets from `<static_dir>/static`; any other unknown
/// path gets `<static_dir>/index.html` so the UI can route client-side.
pub fn create_router(state: AppState) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let assets = ServeDir::new(state.static_dir.join("static"));
    let index = ServeFile::new(state.static_dir.join("index.html"));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/stream", get(ws::stream_handler))
        .nest_service("/static", assets)
        .fallback_service(index)
        .layer(trace_layer)
        .with_state(state)
}
