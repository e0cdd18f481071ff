//! Service configuration loaded from a TOML file

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{BuilderError, Result};

pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:3000";
pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
pub const DEFAULT_STATUS_CONTEXT: &str = "Snap Builder";
pub const DEFAULT_RELEASE_CHANNEL: &str = "beta/pr-{number}";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60 * 60;

/// Placeholder in a release channel template replaced by the pull request number
pub const CHANNEL_NUMBER_PLACEHOLDER: &str = "{number}";

#[derive(Debug, Deserialize, Clone)]
pub struct SnapBuilderConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    pub webhook_secret: String,
    pub log_dir: Option<PathBuf>,
    #[serde(default)]
    pub build: BuildConfig,
    pub github: Option<GithubConfig>,
    #[serde(default)]
    pub repo: Vec<RepoConfig>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BuildConfig {
    pub command: Vec<String>,
    pub upload_command: Vec<String>,
    pub artifact_extension: String,
    pub release_channel: String,
    pub timeout_secs: u64,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            command: vec!["snapcraft".to_string(), "remote-build".to_string()],
            upload_command: vec!["snapcraft".to_string(), "upload".to_string()],
            artifact_extension: "snap".to_string(),
            release_channel: DEFAULT_RELEASE_CHANNEL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl BuildConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GithubConfig {
    pub app_id: u64,
    pub private_key_path: PathBuf,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_status_context")]
    pub status_context: String,
    pub target_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RepoConfig {
    /// Full repository name, `owner/name`
    pub name: String,
    pub channel: Option<String>,
}

fn default_bind() -> String {
    DEFAULT_BIND_ADDRESS.to_string()
}

fn default_api_url() -> String {
    DEFAULT_GITHUB_API_URL.to_string()
}

fn default_status_context() -> String {
    DEFAULT_STATUS_CONTEXT.to_string()
}

fn field_error(field: &str) -> BuilderError {
    BuilderError::ConfigError(format!("configuration field is invalid: '{}'", field))
}

impl SnapBuilderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.webhook_secret.is_empty() {
            return Err(field_error("webhook_secret"));
        }
        if self.bind.is_empty() {
            return Err(field_error("bind"));
        }
        if self.build.command.is_empty() || self.build.command[0].is_empty() {
            return Err(field_error("build.command"));
        }
        if self.build.upload_command.is_empty() || self.build.upload_command[0].is_empty() {
            return Err(field_error("build.upload_command"));
        }
        if self.build.artifact_extension.is_empty() {
            return Err(field_error("build.artifact_extension"));
        }
        if self.build.release_channel.is_empty() {
            return Err(field_error("build.release_channel"));
        }
        if self.build.timeout_secs == 0 {
            return Err(field_error("build.timeout_secs"));
        }

        if let Some(github) = &self.github {
            if github.app_id == 0 {
                return Err(field_error("github.app_id"));
            }
            if github.private_key_path.as_os_str().is_empty() {
                return Err(field_error("github.private_key_path"));
            }
            if github.api_url.is_empty() {
                return Err(field_error("github.api_url"));
            }
        }

        for repo in &self.repo {
            if repo.name.is_empty() {
                return Err(field_error("repo name"));
            }
            if matches!(&repo.channel, Some(c) if c.is_empty()) {
                return Err(field_error(&format!("{}'s channel", repo.name)));
            }
        }

        Ok(())
    }

    /// Returns true if pull requests against `full_name` should be built.
    /// An empty repo list accepts every repository.
    pub fn accepts_repo(&self, full_name: &str) -> bool {
        self.repo.is_empty() || self.repo.iter().any(|r| r.name == full_name)
    }

    /// Returns the release channel for a pull request, with the PR number substituted.
    /// A per-repo channel overrides the global template.
    pub fn release_channel_for(&self, full_name: &str, number: u64) -> String {
        let template = self
            .repo
            .iter()
            .find(|r| r.name == full_name)
            .and_then(|r| r.channel.as_deref())
            .unwrap_or(&self.build.release_channel);
        template.replace(CHANNEL_NUMBER_PLACEHOLDER, &number.to_string())
    }
}

/// Parse configuration from TOML text and validate it
pub fn parse_config(contents: &str) -> Result<SnapBuilderConfig> {
    let config: SnapBuilderConfig = toml::from_str(contents)?;
    config.validate()?;
    Ok(config)
}

/// Load, parse and validate the configuration file
pub fn load_config(path: impl AsRef<Path>) -> Result<SnapBuilderConfig> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|e| {
        BuilderError::ConfigError(format!(
            "Failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;

    parse_config(&contents)
}
