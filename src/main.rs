use std::time::Duration;

use subtitle_relay::{ApiError, AppState, Config, create_router, upload::cleanup_stale_uploads};
use tokio::net::TcpListener;
use tracing::{info, warn};

const STALE_UPLOAD_SECONDS: u64 = 60 * 60;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "subtitle_relay=info,tower_http=info".to_string()),
        )
        .init();

    if let Err(error) = run().await {
        eprintln!("Server error: {}", error.message);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), ApiError> {
    let config = Config::from_env()?;

    tokio::fs::create_dir_all(&config.upload_dir)
        .await
        .map_err(|error| {
            ApiError::internal(format!(
                "Could not create upload directory {:?}: {error}",
                config.upload_dir
            ))
        })?;
    cleanup_stale_uploads(&config.upload_dir, Duration::from_secs(STALE_UPLOAD_SECONDS)).await;

    if !config.use_system_proxy {
        warn!("UPSTREAM_SYSTEM_PROXY=false: upstream calls bypass system proxies.");
    }
    info!(
        "Relaying to {} as {:?} (timeout {}s)",
        config.base_url,
        config.user_agent,
        config.upstream_timeout.as_secs()
    );

    let addr = config.bind_addr.clone();
    let state = AppState::new(config)?;
    let app = create_router(state);

    let listener = TcpListener::bind(&addr).await.map_err(|error| {
        ApiError::internal(format!("Could not bind {addr}: {error}"))
    })?;

    info!("Subtitle relay listening on http://{addr}");

    axum::serve(listener, app)
        .await
        .map_err(|error| ApiError::internal(format!("HTTP server error: {error}")))
}
