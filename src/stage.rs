//! Isolated checkouts of a pull request's head commit

use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, error, info, warn};

use crate::error::{BuilderError, Result};
use crate::runner::{CommandRunner, CommandSpec};

/// Remote name the pull request's fork is registered under
pub const FORK_REMOTE: &str = "fork";

const TEMP_DIR_PREFIX: &str = "snap-builder-";

// Fail instead of waiting on a credential prompt for private or missing URLs
const NO_PROMPT: (&str, &str) = ("GIT_TERMINAL_PROMPT", "0");

/// A git working tree at the target commit.
///
/// The directory is removed when this value is dropped, whatever path the
/// owner leaves by. `close` does the same but reports removal errors.
#[derive(Debug)]
pub struct StagedCheckout {
    dir: TempDir,
    commit: String,
}

impl StagedCheckout {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn commit(&self) -> &str {
        &self.commit
    }

    pub fn close(self) -> Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir.close()?;
        debug!("Removed checkout at '{}'", path.display());
        Ok(())
    }
}

/// Clones a base repository and moves it onto a commit from a fork
#[derive(Clone)]
pub struct SourceStager {
    runner: Arc<dyn CommandRunner>,
}

impl SourceStager {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Produce a checkout of `commit` with the full history of `base_url`
    /// and `fork_url` registered as the `fork` remote.
    pub async fn stage(
        &self,
        base_url: &str,
        fork_url: &str,
        commit: &str,
    ) -> Result<StagedCheckout> {
        let dir = tempfile::Builder::new()
            .prefix(TEMP_DIR_PREFIX)
            .tempdir()
            .map_err(|e| BuilderError::StagingFailed {
                step: "create directory".to_string(),
                cause: e.to_string(),
            })?;
        let path = dir.path();
        info!(
            "Staging {} (fork {}) at {} in '{}'",
            base_url,
            fork_url,
            commit,
            path.display()
        );

        let target = path.to_string_lossy().to_string();

        // Full clone from base so `git describe` has its tags and ancestry
        self.git("clone", path, ["clone", "--", base_url, target.as_str()])
            .await?;
        self.git("add remote", path, ["remote", "add", FORK_REMOTE, fork_url])
            .await?;
        self.git("fetch", path, ["fetch", FORK_REMOTE]).await?;
        // Detach HEAD at the commit, then make index and tree match it
        self.git("checkout", path, ["update-ref", "--no-deref", "HEAD", commit])
            .await?;
        self.git("reset", path, ["reset", "--hard", "HEAD"]).await?;

        Ok(StagedCheckout {
            dir,
            commit: commit.to_string(),
        })
    }

    async fn git<const N: usize>(&self, step: &str, cwd: &Path, args: [&str; N]) -> Result<()> {
        let spec = CommandSpec::new("git")
            .args(args)
            .env(NO_PROMPT.0, NO_PROMPT.1)
            .current_dir(cwd)
            .capture();

        let outcome = self.runner.run(&spec).await.map_err(|e| {
            error!("git {} failed: {}", step, e);
            BuilderError::StagingFailed {
                step: step.to_string(),
                cause: e.to_string(),
            }
        })?;

        if !outcome.success() {
            let cause = outcome.failure_reason();
            warn!("git {} failed: {}", step, cause);
            return Err(BuilderError::StagingFailed {
                step: step.to_string(),
                cause,
            });
        }

        if !outcome.stderr.trim().is_empty() {
            debug!("git {} output:\n{}", step, outcome.stderr.trim());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::fake::{RecordingRunner, exit};
    use crate::runner::{CommandOutcome, OutputMode};
    use std::path::PathBuf;

    fn clone_target(calls: &[CommandSpec]) -> PathBuf {
        PathBuf::from(&calls[0].args[3])
    }

    #[tokio::test]
    async fn runs_git_steps_in_order() {
        let runner = Arc::new(RecordingRunner::succeeding());
        let stager = SourceStager::new(runner.clone());

        let checkout = stager
            .stage("https://example.com/base", "https://example.com/fork", "abc123")
            .await
            .unwrap();

        let calls = runner.calls();
        let args: Vec<Vec<String>> = calls.iter().map(|c| c.args.clone()).collect();
        let dir = checkout.path().to_string_lossy().to_string();
        assert_eq!(
            args,
            vec![
                vec![
                    "clone".to_string(),
                    "--".into(),
                    "https://example.com/base".into(),
                    dir
                ],
                vec![
                    "remote".into(),
                    "add".into(),
                    "fork".into(),
                    "https://example.com/fork".into()
                ],
                vec!["fetch".into(), "fork".into()],
                vec![
                    "update-ref".into(),
                    "--no-deref".into(),
                    "HEAD".into(),
                    "abc123".into()
                ],
                vec!["reset".into(), "--hard".into(), "HEAD".into()],
            ]
        );
        assert!(calls.iter().all(|c| c.program == "git"));
        assert!(calls.iter().all(|c| c.output == OutputMode::Capture));
        assert!(calls.iter().all(|c| {
            c.envs == vec![("GIT_TERMINAL_PROMPT".to_string(), "0".to_string())]
        }));
        assert!(calls.iter().all(|c| c.cwd.as_deref() == Some(checkout.path())));
        assert_eq!(checkout.commit(), "abc123");
    }

    #[tokio::test]
    async fn checkout_is_removed_on_drop() {
        let runner = Arc::new(RecordingRunner::succeeding());
        let stager = SourceStager::new(runner);

        let checkout = stager.stage("base", "fork", "c0ffee").await.unwrap();
        let path = checkout.path().to_path_buf();
        assert!(path.exists());

        drop(checkout);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn checkout_is_removed_on_close() {
        let runner = Arc::new(RecordingRunner::succeeding());
        let stager = SourceStager::new(runner);

        let checkout = stager.stage("base", "fork", "c0ffee").await.unwrap();
        let path = checkout.path().to_path_buf();
        checkout.close().unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn failed_fetch_leaves_no_directory() {
        let runner = Arc::new(RecordingRunner::with(|spec| {
            if spec.args[0] == "fetch" {
                CommandOutcome {
                    code: Some(128),
                    stderr: "fatal: could not read from remote repository".into(),
                    ..Default::default()
                }
            } else {
                exit(0)
            }
        }));
        let stager = SourceStager::new(runner.clone());

        let err = stager.stage("base", "fork", "c0ffee").await.unwrap_err();
        match err {
            BuilderError::StagingFailed { step, cause } => {
                assert_eq!(step, "fetch");
                assert!(cause.contains("could not read from remote"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let calls = runner.calls();
        assert_eq!(calls.len(), 3);
        assert!(!clone_target(&calls).exists());
    }

    #[tokio::test]
    async fn unknown_commit_fails_staging() {
        let runner = Arc::new(RecordingRunner::with(|spec| {
            if spec.args[0] == "update-ref" {
                exit(1)
            } else {
                exit(0)
            }
        }));
        let stager = SourceStager::new(runner.clone());

        let err = stager.stage("base", "fork", "deadbeef").await.unwrap_err();
        assert!(
            matches!(err, BuilderError::StagingFailed { ref step, .. } if step == "checkout")
        );
        assert!(!clone_target(&runner.calls()).exists());
    }
}
