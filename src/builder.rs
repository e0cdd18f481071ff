//! Build orchestration: stage the sources, run the build tool, upload what it produced

use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::config::BuildConfig;
use crate::error::{BuilderError, Result};
use crate::runner::{CommandRunner, CommandSpec};
use crate::stage::{SourceStager, StagedCheckout};

/// One pull request build: where the sources come from and where artifacts go
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub base_url: String,
    pub head_url: String,
    pub commit: String,
    pub channel: String,
}

impl BuildRequest {
    pub fn new(
        base_url: impl Into<String>,
        head_url: impl Into<String>,
        commit: impl Into<String>,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            head_url: head_url.into(),
            commit: commit.into(),
            channel: channel.into(),
        }
    }
}

/// What a finished build released. File names only; the checkout is gone by now.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub artifacts: Vec<String>,
}

pub struct SnapBuilder {
    request: BuildRequest,
    settings: BuildConfig,
    runner: Arc<dyn CommandRunner>,
    stager: SourceStager,
}

impl SnapBuilder {
    pub fn new(
        request: BuildRequest,
        settings: BuildConfig,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        let stager = SourceStager::new(runner.clone());
        Self {
            request,
            settings,
            runner,
            stager,
        }
    }

    /// Stage, build, and upload every artifact to the request's channel.
    /// The staged checkout is removed on every path out of here.
    pub async fn build_and_release(&self) -> Result<BuildReport> {
        let checkout = self
            .stager
            .stage(
                &self.request.base_url,
                &self.request.head_url,
                &self.request.commit,
            )
            .await?;

        let result = self.build_in(&checkout).await;

        let path = checkout.path().to_path_buf();
        if let Err(e) = checkout.close() {
            warn!("Failed to remove checkout '{}': {}", path.display(), e);
        }

        result
    }

    async fn build_in(&self, checkout: &StagedCheckout) -> Result<BuildReport> {
        // Artifacts committed to the repository are not build output
        let extension = &self.settings.artifact_extension;
        let existing = discover_artifacts(checkout.path(), extension)?;
        if !existing.is_empty() {
            debug!("Ignoring {} pre-existing artifact(s)", existing.len());
        }

        let build = CommandSpec::from_argv(&self.settings.command).current_dir(checkout.path());
        let outcome = self.runner.run(&build).await.map_err(|e| {
            error!("Build command could not run: {}", e);
            BuilderError::BuildFailed(e.to_string())
        })?;
        if !outcome.success() {
            let reason = format!("'{}' {}", build.display(), outcome.failure_reason());
            error!("Build failed: {}", reason);
            return Err(BuilderError::BuildFailed(reason));
        }

        let artifacts: Vec<PathBuf> = discover_artifacts(checkout.path(), extension)?
            .into_iter()
            .filter(|path| !existing.contains(path))
            .collect();
        if artifacts.is_empty() {
            info!("No new artifacts produced for {}", checkout.commit());
            return Ok(BuildReport::default());
        }

        // Every artifact gets an upload attempt; failures are reported together
        let mut failures = Vec::new();
        let mut released = Vec::new();
        for artifact in &artifacts {
            let name = artifact_name(artifact);
            let upload = CommandSpec::from_argv(&self.settings.upload_command)
                .arg(artifact.to_string_lossy())
                .arg(format!("--release={}", self.request.channel))
                .current_dir(checkout.path());

            info!("Uploading '{}' to '{}'", name, self.request.channel);
            match self.runner.run(&upload).await {
                Ok(outcome) if outcome.success() => released.push(name),
                Ok(outcome) => {
                    error!("Upload of '{}' failed: {}", name, outcome.failure_reason());
                    failures.push(format!("{}: {}", name, outcome.failure_reason()));
                }
                Err(e) => {
                    error!("Upload of '{}' failed: {}", name, e);
                    failures.push(format!("{}: {}", name, e));
                }
            }
        }

        if !failures.is_empty() {
            return Err(BuilderError::ReleaseFailed { failures });
        }

        info!(
            "Released {} artifact(s) to '{}'",
            released.len(),
            self.request.channel
        );
        Ok(BuildReport {
            artifacts: released,
        })
    }
}

fn artifact_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

/// Regular files directly inside `dir` with the given extension, sorted
pub fn discover_artifacts(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let extension = extension.trim_start_matches('.');
    let mut artifacts = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_file()
            && path.extension().is_some_and(|ext| ext == extension)
        {
            artifacts.push(path);
        }
    }
    artifacts.sort();
    Ok(artifacts)
}

/// Starts builds for event handlers
#[async_trait]
pub trait BuildLauncher: Send + Sync {
    async fn launch(&self, request: BuildRequest) -> Result<BuildReport>;
}

/// Launches real `SnapBuilder`s on the host
pub struct SnapBuildLauncher {
    settings: BuildConfig,
    runner: Arc<dyn CommandRunner>,
}

impl SnapBuildLauncher {
    pub fn new(settings: BuildConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self { settings, runner }
    }
}

#[async_trait]
impl BuildLauncher for SnapBuildLauncher {
    async fn launch(&self, request: BuildRequest) -> Result<BuildReport> {
        let span = info_span!(
            "build",
            build_id = %Uuid::now_v7(),
            commit = %request.commit,
            channel = %request.channel,
        );
        let builder = SnapBuilder::new(request, self.settings.clone(), self.runner.clone());
        builder.build_and_release().instrument(span).await
    }
}
