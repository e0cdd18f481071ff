//! GitHub App authentication and commit status reporting

use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs;
use tracing::{debug, info};

use crate::config::{DEFAULT_STATUS_CONTEXT, GithubConfig};
use crate::error::{BuilderError, Result};

const USER_AGENT: &str = concat!("github_snap_builder/", env!("CARGO_PKG_VERSION"));
const JWT_LIFETIME_SECS: i64 = 10 * 60;
// Tolerate clock drift between us and GitHub
const JWT_BACKDATE_SECS: i64 = 60;

#[derive(Debug, Serialize, Deserialize)]
pub struct AppClaims {
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

#[derive(Debug, Deserialize)]
struct AccessToken {
    token: String,
}

/// Commit status states accepted by the statuses API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitState {
    Pending,
    Success,
    Failure,
    Error,
}

/// A GitHub App identity able to mint installation tokens
#[derive(Clone)]
pub struct GitHubApp {
    app_id: u64,
    key: EncodingKey,
    api_url: String,
    status_context: String,
    target_url: Option<String>,
    http: reqwest::Client,
}

impl GitHubApp {
    pub fn new(app_id: u64, private_key_pem: &[u8], api_url: impl Into<String>) -> Result<Self> {
        let key = EncodingKey::from_rsa_pem(private_key_pem)
            .map_err(|e| BuilderError::ConfigError(format!("Invalid GitHub App key: {}", e)))?;
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| BuilderError::GitHub(e.to_string()))?;

        Ok(Self {
            app_id,
            key,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            status_context: DEFAULT_STATUS_CONTEXT.to_string(),
            target_url: None,
            http,
        })
    }

    pub fn from_config(config: &GithubConfig) -> Result<Self> {
        let pem = fs::read(&config.private_key_path).map_err(|e| {
            BuilderError::ConfigError(format!(
                "Failed to read GitHub App key '{}': {}",
                config.private_key_path.display(),
                e
            ))
        })?;

        let mut app = Self::new(config.app_id, &pem, &config.api_url)?;
        app.status_context = config.status_context.clone();
        app.target_url = config.target_url.clone();
        Ok(app)
    }

    /// Short lived JWT identifying the app itself
    pub fn app_jwt(&self) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = AppClaims {
            iat: now - JWT_BACKDATE_SECS,
            exp: now + JWT_LIFETIME_SECS,
            iss: self.app_id.to_string(),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.key)
            .map_err(|e| BuilderError::GitHub(format!("Failed to sign app JWT: {}", e)))
    }

    /// Exchange the app JWT for an installation access token
    pub async fn installation_token(&self, installation_id: u64) -> Result<String> {
        let jwt = self.app_jwt()?;
        let url = format!(
            "{}/app/installations/{}/access_tokens",
            self.api_url, installation_id
        );
        debug!("Requesting installation token for {}", installation_id);

        let response = self
            .http
            .post(&url)
            .bearer_auth(jwt)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| BuilderError::GitHub(e.to_string()))?;

        let response = check_status(response).await?;
        let token: AccessToken = response
            .json()
            .await
            .map_err(|e| BuilderError::GitHub(format!("Invalid token response: {}", e)))?;
        Ok(token.token)
    }

    /// Authenticate as `installation_id` and bind a reporter to one commit
    pub async fn status_reporter(
        &self,
        installation_id: u64,
        owner: &str,
        repo: &str,
        sha: &str,
    ) -> Result<StatusReporter> {
        let token = self.installation_token(installation_id).await?;
        Ok(StatusReporter {
            http: self.http.clone(),
            url: format!("{}/repos/{}/{}/statuses/{}", self.api_url, owner, repo, sha),
            token,
            context: self.status_context.clone(),
            target_url: self.target_url.clone(),
        })
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(BuilderError::GitHub(format!("{}: {}", status, body)))
}

/// Posts commit statuses for a single commit
pub struct StatusReporter {
    http: reqwest::Client,
    url: String,
    token: String,
    context: String,
    target_url: Option<String>,
}

impl StatusReporter {
    pub async fn pending(&self, description: &str) -> Result<()> {
        self.create_status(CommitState::Pending, description).await
    }

    pub async fn success(&self, description: &str) -> Result<()> {
        self.create_status(CommitState::Success, description).await
    }

    pub async fn failure(&self, description: &str) -> Result<()> {
        self.create_status(CommitState::Failure, description).await
    }

    pub async fn error(&self, description: &str) -> Result<()> {
        self.create_status(CommitState::Error, description).await
    }

    async fn create_status(&self, state: CommitState, description: &str) -> Result<()> {
        info!("Reporting {:?} status: {}", state, description);
        let mut body = json!({
            "state": state,
            "description": description,
            "context": self.context,
        });
        if let Some(target_url) = &self.target_url {
            body["target_url"] = json!(target_url);
        }

        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .json(&body)
            .send()
            .await
            .map_err(|e| BuilderError::GitHub(e.to_string()))?;
        check_status(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{DecodingKey, Validation};

    const PRIVATE_KEY: &[u8] = include_bytes!("../tests/fixtures/app-key.pem");
    const PUBLIC_KEY: &[u8] = include_bytes!("../tests/fixtures/app-key.pub.pem");

    #[test]
    fn app_jwt_is_signed_with_app_key() {
        let app = GitHubApp::new(68748, PRIVATE_KEY, "https://api.github.com").unwrap();
        let jwt = app.app_jwt().unwrap();

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_required_spec_claims(&["exp", "iss"]);
        let decoded = jsonwebtoken::decode::<AppClaims>(
            &jwt,
            &DecodingKey::from_rsa_pem(PUBLIC_KEY).unwrap(),
            &validation,
        )
        .unwrap();

        assert_eq!(decoded.claims.iss, "68748");
        assert_eq!(
            decoded.claims.exp - decoded.claims.iat,
            JWT_LIFETIME_SECS + JWT_BACKDATE_SECS
        );
    }

    #[test]
    fn invalid_key_is_a_config_error() {
        let err = GitHubApp::new(1, b"not a key", "https://api.github.com")
            .err()
            .unwrap();
        assert!(matches!(err, BuilderError::ConfigError(_)));
    }

    #[test]
    fn commit_states_serialize_lowercase() {
        assert_eq!(json!(CommitState::Pending), json!("pending"));
        assert_eq!(json!(CommitState::Failure), json!("failure"));
        assert_eq!(json!(CommitState::Error), json!("error"));
    }
}
