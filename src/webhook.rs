//! Webhook related structures

use serde::Deserialize;
use serde_json::Value;

use crate::error::{BuilderError, Result};

/// A single inbound delivery: the `X-GitHub-Event` label plus its JSON body.
/// Consumed by exactly one handler.
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub event_type: String,
    pub payload: Value,
}

impl WebhookEvent {
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
        }
    }
}

// Subset of the GitHub `pull_request` payload that the builder consumes

#[derive(Debug, Deserialize)]
struct PullRequestPayload {
    action: Option<String>,
    installation: Option<Installation>,
    pull_request: PullRequest,
}

#[derive(Debug, Deserialize)]
struct Installation {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct PullRequest {
    number: u64,
    base: BaseRef,
    head: HeadRef,
}

#[derive(Debug, Deserialize)]
struct BaseRef {
    repo: BaseRepo,
}

#[derive(Debug, Deserialize)]
struct BaseRepo {
    full_name: String,
    html_url: String,
}

#[derive(Debug, Deserialize)]
struct HeadRef {
    sha: String,
    repo: HeadRepo,
}

#[derive(Debug, Deserialize)]
struct HeadRepo {
    html_url: String,
}

/// Everything needed to build one pull request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestContext {
    pub installation_id: Option<u64>,
    pub number: u64,
    pub action: Option<String>,
    pub owner: String,
    pub repo: String,
    /// Clone URL of the repository the PR targets
    pub base_url: String,
    /// Clone URL of the fork the PR comes from
    pub head_url: String,
    pub commit: String,
}

impl PullRequestContext {
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

impl TryFrom<&WebhookEvent> for PullRequestContext {
    type Error = BuilderError;

    fn try_from(event: &WebhookEvent) -> Result<Self> {
        let payload: PullRequestPayload = serde_json::from_value(event.payload.clone())
            .map_err(|e| BuilderError::MalformedPayload(e.to_string()))?;

        let pr = payload.pull_request;
        let (owner, repo) = pr
            .base
            .repo
            .full_name
            .split_once('/')
            .filter(|(owner, repo)| !owner.is_empty() && !repo.is_empty() && !repo.contains('/'))
            .ok_or_else(|| {
                BuilderError::MalformedPayload(format!(
                    "base repository name '{}' is not owner/name",
                    pr.base.repo.full_name
                ))
            })?;

        for (field, value) in [
            ("pull_request.base.repo.html_url", &pr.base.repo.html_url),
            ("pull_request.head.repo.html_url", &pr.head.repo.html_url),
            ("pull_request.head.sha", &pr.head.sha),
        ] {
            if value.is_empty() {
                return Err(BuilderError::MalformedPayload(format!("{} is empty", field)));
            }
        }

        Ok(Self {
            installation_id: payload.installation.map(|i| i.id),
            number: pr.number,
            action: payload.action,
            owner: owner.to_string(),
            repo: repo.to_string(),
            base_url: pr.base.repo.html_url,
            head_url: pr.head.repo.html_url,
            commit: pr.head.sha,
        })
    }
}
