//! Thin abstraction over running external tools (git, the build tool, the uploader)

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::error::{BuilderError, Result};

/// Where a child's stdout/stderr go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Child writes straight to our stdout/stderr
    Inherit,
    /// Child output is collected and returned
    Capture,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Added to the inherited environment
    pub envs: Vec<(String, String)>,
    pub output: OutputMode,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            envs: Vec::new(),
            output: OutputMode::Inherit,
        }
    }

    /// Build from an argv list; the first element is the program.
    pub fn from_argv(argv: &[String]) -> Self {
        let mut parts = argv.iter();
        let program = parts.next().cloned().unwrap_or_default();
        Self::new(program).args(parts.cloned())
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn capture(mut self) -> Self {
        self.output = OutputMode::Capture;
        self
    }

    /// Human readable command line for logs and errors
    pub fn display(&self) -> String {
        let mut cmd = self.program.clone();
        for arg in &self.args {
            cmd.push(' ');
            cmd.push_str(arg);
        }
        cmd
    }
}

/// Exit status plus whatever output was captured
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutcome {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Short reason for a failed run
    pub fn failure_reason(&self) -> String {
        let status = match self.code {
            Some(code) => format!("exit code {}", code),
            None => "terminated by signal".to_string(),
        };
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            status
        } else {
            format!("{}: {}", status, stderr)
        }
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion. Only spawn errors and timeouts are `Err`;
    /// a non-zero exit is reported through the outcome.
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutcome>;
}

/// Runs commands on the host with a hard timeout around each invocation
#[derive(Debug, Clone)]
pub struct SystemRunner {
    timeout: Duration,
}

impl SystemRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutcome> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(spec.envs.iter().map(|(k, v)| (k, v)))
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }

        let cwd = spec
            .cwd
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| ".".to_string());
        info!("Running (cwd = '{}'): {}", cwd, spec.display());

        let start_error = |e: std::io::Error| {
            error!("{} failed to start: {}", spec.program, e);
            BuilderError::CommandFailed {
                command: spec.display(),
                message: e.to_string(),
            }
        };
        let timed_out = || {
            error!(
                "{} timed out after {}s",
                spec.display(),
                self.timeout.as_secs()
            );
            BuilderError::Timeout {
                command: spec.display(),
                seconds: self.timeout.as_secs(),
            }
        };

        let outcome = match spec.output {
            OutputMode::Inherit => {
                command
                    .stdin(Stdio::null())
                    .stdout(Stdio::inherit())
                    .stderr(Stdio::inherit());
                let mut child = command.spawn().map_err(start_error)?;
                let status = tokio::time::timeout(self.timeout, child.wait())
                    .await
                    .map_err(|_| timed_out())?
                    .map_err(start_error)?;
                CommandOutcome {
                    code: status.code(),
                    ..Default::default()
                }
            }
            OutputMode::Capture => {
                command
                    .stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped());
                let output = tokio::time::timeout(self.timeout, command.output())
                    .await
                    .map_err(|_| timed_out())?
                    .map_err(start_error)?;
                CommandOutcome {
                    code: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                }
            }
        };

        debug!("{} exited with {:?}", spec.program, outcome.code);
        Ok(outcome)
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::sync::Mutex;

    type Responder = Box<dyn Fn(&CommandSpec) -> CommandOutcome + Send + Sync>;

    /// Records every invocation and answers with a scripted outcome
    pub(crate) struct RecordingRunner {
        calls: Mutex<Vec<CommandSpec>>,
        respond: Responder,
    }

    impl RecordingRunner {
        pub(crate) fn succeeding() -> Self {
            Self::with(|_| exit(0))
        }

        pub(crate) fn with(
            respond: impl Fn(&CommandSpec) -> CommandOutcome + Send + Sync + 'static,
        ) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                respond: Box::new(respond),
            }
        }

        pub(crate) fn calls(&self) -> Vec<CommandSpec> {
            self.calls.lock().unwrap().clone()
        }
    }

    pub(crate) fn exit(code: i32) -> CommandOutcome {
        CommandOutcome {
            code: Some(code),
            ..Default::default()
        }
    }

    #[async_trait]
    impl CommandRunner for RecordingRunner {
        async fn run(&self, spec: &CommandSpec) -> Result<CommandOutcome> {
            self.calls.lock().unwrap().push(spec.clone());
            Ok((self.respond)(spec))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_argv_splits_program_and_args() {
        let argv = vec!["snapcraft".to_string(), "remote-build".to_string()];
        let spec = CommandSpec::from_argv(&argv).current_dir("/tmp/x");
        assert_eq!(spec.program, "snapcraft");
        assert_eq!(spec.args, vec!["remote-build"]);
        assert_eq!(spec.cwd, Some(PathBuf::from("/tmp/x")));
        assert_eq!(spec.output, OutputMode::Inherit);
        assert_eq!(spec.display(), "snapcraft remote-build");
    }

    #[test]
    fn failure_reason_includes_stderr() {
        let outcome = CommandOutcome {
            code: Some(128),
            stdout: String::new(),
            stderr: "fatal: repository not found\n".to_string(),
        };
        assert!(!outcome.success());
        assert_eq!(
            outcome.failure_reason(),
            "exit code 128: fatal: repository not found"
        );
    }

    #[tokio::test]
    async fn system_runner_reports_exit_codes() {
        let runner = SystemRunner::new(Duration::from_secs(10));
        let ok = runner
            .run(&CommandSpec::new("sh").args(["-c", "exit 0"]).capture())
            .await
            .unwrap();
        assert!(ok.success());

        let failed = runner
            .run(&CommandSpec::new("sh").args(["-c", "echo boom >&2; exit 3"]).capture())
            .await
            .unwrap();
        assert_eq!(failed.code, Some(3));
        assert_eq!(failed.stderr.trim(), "boom");
    }

    #[tokio::test]
    async fn system_runner_passes_environment() {
        let runner = SystemRunner::new(Duration::from_secs(10));
        let outcome = runner
            .run(
                &CommandSpec::new("sh")
                    .args(["-c", "printf %s \"$SNAP_BUILDER_TEST\""])
                    .env("SNAP_BUILDER_TEST", "visible")
                    .capture(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.stdout, "visible");
    }

    #[tokio::test]
    async fn system_runner_times_out() {
        let runner = SystemRunner::new(Duration::from_millis(100));
        let err = runner
            .run(&CommandSpec::new("sleep").arg("5"))
            .await
            .unwrap_err();
        assert!(matches!(err, BuilderError::Timeout { .. }));
    }

    #[tokio::test]
    async fn missing_program_fails_to_start() {
        let runner = SystemRunner::new(Duration::from_secs(5));
        let err = runner
            .run(&CommandSpec::new("definitely-not-a-real-binary-xyz"))
            .await
            .unwrap_err();
        assert!(matches!(err, BuilderError::CommandFailed { .. }));
    }
}
