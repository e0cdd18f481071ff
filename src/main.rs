use github_snap_builder::api;
use github_snap_builder::logging::setup_logging;
use github_snap_builder::signature::SignatureVerifier;
use github_snap_builder::{AppState, build_event_router, load_config};
use std::sync::Arc;
use tracing::{error, info};

const DEFAULT_CONFIG_PATH: &str = "snap_builder.toml";

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let config_path =
        std::env::var("SNAP_BUILDER_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

    let config = match load_config(&config_path) {
        Ok(cfg) => Arc::new(cfg),
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // Guard must outlive the server so file logs are flushed
    let (logs, _log_guard) = match setup_logging(config.log_dir.as_deref()) {
        Ok(logging) => logging,
        Err(e) => {
            eprintln!("Logging error: {}", e);
            std::process::exit(1);
        }
    };

    let router = match build_event_router(config.clone()) {
        Ok(router) => router,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let bind_address = std::env::var("BIND_ADDRESS").unwrap_or_else(|_| config.bind.clone());
    let state = Arc::new(AppState::new(
        SignatureVerifier::new(config.webhook_secret.clone()),
        router,
        logs,
    ));
    let app = api::app(state);

    info!("Listening on {}", bind_address);
    info!("Using config at {:?}", config_path);
    let listener = match tokio::net::TcpListener::bind(&bind_address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", bind_address, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}
