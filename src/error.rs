use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::io;

/// Custom error type for github_snap_builder operations
#[derive(Debug, thiserror::Error)]
pub enum BuilderError {
    #[error("Missing webhook signature header")]
    Unauthorized,

    #[error("Webhook signature rejected: {0}")]
    Forbidden(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("No handler registered for event '{0}'")]
    NotFound(String),

    #[error("Malformed webhook payload: {0}")]
    MalformedPayload(String),

    #[error("Staging failed during {step}: {cause}")]
    StagingFailed { step: String, cause: String },

    #[error("Build failed: {0}")]
    BuildFailed(String),

    #[error("Release failed for {}", .failures.join("; "))]
    ReleaseFailed { failures: Vec<String> },

    #[error("Command '{command}' failed to start: {message}")]
    CommandFailed { command: String, message: String },

    #[error("Command '{command}' timed out after {seconds}s")]
    Timeout { command: String, seconds: u64 },

    #[error("Handler task failed: {0}")]
    TaskFailed(String),

    #[error("GitHub API error: {0}")]
    GitHub(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParseError(#[from] toml::de::Error),
}

impl BuilderError {
    /// HTTP status reported to the webhook sender. No body accompanies it.
    pub fn status_code(&self) -> StatusCode {
        match self {
            BuilderError::Unauthorized | BuilderError::Forbidden(_) => StatusCode::FORBIDDEN,
            BuilderError::NotFound(_) => StatusCode::NOT_FOUND,
            BuilderError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
            // Includes BadRequest: a delivery without an event header gets 500
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for BuilderError {
    fn into_response(self) -> Response {
        self.status_code().into_response()
    }
}

/// Helper type for Results that use BuilderError
pub type Result<T> = std::result::Result<T, BuilderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_errors_map_to_forbidden() {
        assert_eq!(BuilderError::Unauthorized.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            BuilderError::Forbidden("mismatch".into()).status_code(),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn routing_errors_map_to_expected_codes() {
        assert_eq!(
            BuilderError::NotFound("push".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            BuilderError::BadRequest("no event".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            BuilderError::MalformedPayload("pull_request".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn release_failure_lists_every_artifact() {
        let err = BuilderError::ReleaseFailed {
            failures: vec!["a.snap: exit 1".into(), "b.snap: exit 2".into()],
        };
        assert_eq!(
            err.to_string(),
            "Release failed for a.snap: exit 1; b.snap: exit 2"
        );
    }
}
