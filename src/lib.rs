//! Relay between a browser subtitle-search client and the OpenSubtitles API.
//!
//! The relay injects the API key and `User-Agent` the browser cannot send,
//! filters title searches locally, and looks up subtitles by movie hash for
//! uploaded video files.

use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{Method, header::CONTENT_TYPE},
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub mod config;
pub mod error;
pub mod handlers;
pub mod moviehash;
pub mod opensubtitles;
pub mod relay;
pub mod search;
pub mod upload;

pub use config::Config;
pub use error::ApiError;
pub use moviehash::{MovieHash, compute_movie_hash};
pub use relay::{RelayClient, RelayError, RelayRequest, RelayResponse, ResponseBody};

use crate::opensubtitles::OpenSubtitles;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub upstream: OpenSubtitles,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, ApiError> {
        let relay = RelayClient::new(config.relay_options())
            .map_err(|error| ApiError::internal(format!("Could not create HTTP client: {error}")))?;
        let upstream = OpenSubtitles::new(relay, &config);

        Ok(Self {
            config: Arc::new(config),
            upstream,
        })
    }
}

pub fn create_router(state: AppState) -> Router {
    let upload_limit = usize::try_from(state.config.max_upload_bytes).unwrap_or(usize::MAX);

    Router::new()
        .route(
            "/api/health",
            get(handlers::health).options(handlers::preflight),
        )
        .route(
            "/api/subtitles",
            get(handlers::search_subtitles).options(handlers::preflight),
        )
        .route(
            "/api/subtitles/hash",
            post(handlers::search_by_hash)
                .options(handlers::preflight)
                .layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route(
            "/api/download",
            post(handlers::download_subtitle).options(handlers::preflight),
        )
        .fallback(handlers::not_found)
        .with_state(state)
        .layer(build_cors_layer())
        .layer(TraceLayer::new_for_http())
}

fn build_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
}
