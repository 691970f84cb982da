//! Personal baseball streaming gateway.
//!
//! Authenticates against the league's streaming service, resolves the
//! stream for a requested broadcast, and re-serves it as a locally hosted,
//! rewritten HLS feed with optional break-skipping and a multiview grid.

mod config;
mod error;
mod fetch;
mod http;
mod multiview;
mod offsets;
mod playlist;
mod schedule;
mod segment;
mod session;
mod state;
mod store;

use clap::Parser;
use std::future::IntoFuture;
use tower_http::services::ServeDir;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::http::create_router;
use crate::state::AppState;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const APP_NAME: &str = "dugout";

#[tokio::main]
async fn main() {
    let config = Config::parse();
    init_logging(&config.log_level);

    tracing::info!("{} v{} starting", APP_NAME, VERSION);

    if let Err(e) = config.validate() {
        tracing::error!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    let state = match AppState::new(config.clone()) {
        Ok(state) => state,
        Err(e) => {
            tracing::error!("Startup failed: {}", e);
            std::process::exit(1);
        }
    };

    // The static server needs the multiview directory before the first
    // composition creates it.
    if let Err(e) = std::fs::create_dir_all(config.multiview_dir()) {
        tracing::error!(
            "Cannot create multiview directory {}: {}",
            config.multiview_dir().display(),
            e
        );
        std::process::exit(1);
    }

    let gateway = create_router(state.clone());
    let files = axum::Router::new().fallback_service(ServeDir::new(config.multiview_dir()));

    tracing::info!("Gateway listening on {}", config.bind);
    tracing::info!("Multiview files on {}", config.multiview_bind);

    let gateway_listener = match tokio::net::TcpListener::bind(config.bind).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Cannot bind {}: {}", config.bind, e);
            std::process::exit(1);
        }
    };
    let files_listener = match tokio::net::TcpListener::bind(config.multiview_bind).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Cannot bind {}: {}", config.multiview_bind, e);
            std::process::exit(1);
        }
    };

    let result = tokio::try_join!(
        axum::serve(gateway_listener, gateway).into_future(),
        axum::serve(files_listener, files).into_future(),
    );
    if let Err(e) = result {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}

/// Initialize logging with tracing
fn init_logging(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("dugout={level},tower_http=info").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
