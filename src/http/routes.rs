//! Axum router configuration

use axum::{
    http::{header, Method},
    routing::get,
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

use super::handlers::{
    guide, highlights, multiview, segment, status, stream_playlist, variant_playlist,
};

/// Create the gateway router.
pub fn create_router(state: Arc<AppState>) -> Router {
    // Browsers and cast devices pull playlists cross-origin, so stay
    // permissive and answer preflights.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS, Method::HEAD])
        .allow_headers([
            header::ACCEPT,
            header::RANGE,
            header::CONTENT_TYPE,
            header::ORIGIN,
        ])
        .allow_private_network(true)
        .max_age(Duration::from_secs(3600));

    Router::new()
        .route("/stream.m3u8", get(stream_playlist))
        .route("/playlist", get(variant_playlist))
        .route("/ts", get(segment))
        .route("/multiview", get(multiview))
        .route("/highlights", get(highlights))
        .route("/guide", get(guide))
        .route("/status", get(status))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
