pub mod api;
pub mod builder;
pub mod config;
pub mod error;
pub mod github;
pub mod handlers;
pub mod logging;
pub mod router;
pub mod runner;
pub mod signature;
pub mod stage;
pub mod webhook;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use builder::SnapBuildLauncher;
use config::SnapBuilderConfig;
use error::Result;
use github::GitHubApp;
use handlers::{PingHandler, PullRequestHandler};
use logging::LogBuffer;
use router::EventRouter;
use runner::SystemRunner;
use signature::SignatureVerifier;

pub use config::load_config;

pub struct AppState {
    pub verifier: SignatureVerifier,
    pub router: EventRouter,
    pub logs: LogBuffer,
    pub start_time: Instant,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(verifier: SignatureVerifier, router: EventRouter, logs: LogBuffer) -> Self {
        Self {
            verifier,
            router,
            logs,
            start_time: Instant::now(),
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<AppState>;

/// Production event table: pull requests build on the host, pings are acknowledged
pub fn build_event_router(config: Arc<SnapBuilderConfig>) -> Result<EventRouter> {
    let runner = Arc::new(SystemRunner::new(config.build.timeout()));
    let launcher = Arc::new(SnapBuildLauncher::new(config.build.clone(), runner));

    let mut pull_requests = PullRequestHandler::new(config.clone(), launcher);
    if let Some(github) = &config.github {
        info!("Reporting commit statuses as GitHub App {}", github.app_id);
        pull_requests = pull_requests.with_github(GitHubApp::from_config(github)?);
    }

    Ok(EventRouter::builder()
        .on("pull_request", Arc::new(pull_requests))
        .on("ping", Arc::new(PingHandler))
        .build())
}
