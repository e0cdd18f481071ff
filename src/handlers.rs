//! Handlers for the GitHub events the builder reacts to

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::builder::{BuildLauncher, BuildRequest};
use crate::config::SnapBuilderConfig;
use crate::error::{BuilderError, Result};
use crate::github::{GitHubApp, StatusReporter};
use crate::router::EventHandler;
use crate::webhook::{PullRequestContext, WebhookEvent};

/// Pull request actions that produce a new head commit worth building
pub const BUILD_ACTIONS: [&str; 3] = ["opened", "reopened", "synchronize"];

/// Builds the head commit of a pull request and releases it to a per-PR channel
pub struct PullRequestHandler {
    config: Arc<SnapBuilderConfig>,
    launcher: Arc<dyn BuildLauncher>,
    github: Option<GitHubApp>,
}

impl PullRequestHandler {
    pub fn new(config: Arc<SnapBuilderConfig>, launcher: Arc<dyn BuildLauncher>) -> Self {
        Self {
            config,
            launcher,
            github: None,
        }
    }

    /// Report commit statuses through this app
    pub fn with_github(mut self, github: GitHubApp) -> Self {
        self.github = Some(github);
        self
    }

    async fn status_reporter(&self, ctx: &PullRequestContext) -> Option<StatusReporter> {
        let github = self.github.as_ref()?;
        let Some(installation_id) = ctx.installation_id else {
            warn!("Pull request payload has no installation id; not reporting status");
            return None;
        };

        match github
            .status_reporter(installation_id, &ctx.owner, &ctx.repo, &ctx.commit)
            .await
        {
            Ok(reporter) => Some(reporter),
            Err(e) => {
                warn!("Could not authenticate installation {}: {}", installation_id, e);
                None
            }
        }
    }
}

// Status reporting is advisory; a failure never fails the build
async fn report<'a, F>(
    reporter: Option<&'a StatusReporter>,
    post: impl FnOnce(&'a StatusReporter) -> F,
) where
    F: std::future::Future<Output = Result<()>> + 'a,
{
    if let Some(reporter) = reporter {
        if let Err(e) = post(reporter).await {
            warn!("Failed to report commit status: {}", e);
        }
    }
}

#[async_trait]
impl EventHandler for PullRequestHandler {
    async fn handle(&self, event: WebhookEvent) -> Result<()> {
        let ctx = PullRequestContext::try_from(&event)?;
        let full_name = ctx.full_name();

        if let Some(action) = ctx.action.as_deref() {
            if !BUILD_ACTIONS.contains(&action) {
                info!(
                    "Ignoring '{}' action on {}#{}",
                    action, full_name, ctx.number
                );
                return Ok(());
            }
        }

        if !self.config.accepts_repo(&full_name) {
            info!("Not configured for repo '{}'. Ignoring event...", full_name);
            return Ok(());
        }

        let channel = self.config.release_channel_for(&full_name, ctx.number);
        info!(
            "Building {}#{} at {} for '{}'",
            full_name, ctx.number, ctx.commit, channel
        );

        let reporter = self.status_reporter(&ctx).await;
        report(reporter.as_ref(), |r| r.pending("Currently building a snap...")).await;

        let request = BuildRequest::new(
            ctx.base_url.clone(),
            ctx.head_url.clone(),
            ctx.commit.clone(),
            channel.clone(),
        );
        let result = self.launcher.launch(request).await;

        match &result {
            Ok(built) if built.artifacts.is_empty() => {
                info!("Build of {} produced no artifacts", ctx.commit);
                report(reporter.as_ref(), |r| r.success("Build produced no snaps")).await;
            }
            Ok(built) => {
                info!("Built and released {:?}, all done", built.artifacts);
                let description = format!("Snap built and released to '{}'", channel);
                report(reporter.as_ref(), |r| r.success(&description)).await;
            }
            Err(e) => {
                error!("Build of {}#{} failed: {}", full_name, ctx.number, e);
                match e {
                    // The commit itself does not build
                    BuilderError::BuildFailed(_) => {
                        report(reporter.as_ref(), |r| {
                            r.failure("Snap failed to build. Please see logs.")
                        })
                        .await;
                    }
                    BuilderError::ReleaseFailed { .. } => {
                        report(reporter.as_ref(), |r| {
                            r.error("Snap failed to push/release. Please see logs.")
                        })
                        .await;
                    }
                    other => {
                        let description = format!("Encountered an error: {}", other);
                        report(reporter.as_ref(), |r| r.error(&description)).await;
                    }
                }
            }
        }

        result.map(|_| ())
    }
}

/// Answers GitHub's `ping` sent when a webhook is first configured
pub struct PingHandler;

#[async_trait]
impl EventHandler for PingHandler {
    async fn handle(&self, event: WebhookEvent) -> Result<()> {
        let zen = event
            .payload
            .get("zen")
            .and_then(|z| z.as_str())
            .unwrap_or_default();
        info!("Received ping: {}", zen);
        debug!("{:#?}", event.payload);
        Ok(())
    }
}
