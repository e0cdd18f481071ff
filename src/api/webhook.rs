//! Webhook handler for GitHub deliveries

use axum::{body::Bytes, extract::State as AxumState, http::HeaderMap};
use tracing::{debug, error, info};

use crate::SharedState;
use crate::error::{BuilderError, Result};

pub const SIGNATURE_HEADER: &str = "X-Hub-Signature";
pub const EVENT_HEADER: &str = "X-GitHub-Event";
pub const DELIVERY_HEADER: &str = "X-GitHub-Delivery";

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Handles the GitHub webhook POST request.
///
/// Runs to completion before answering: 200 once the handler succeeded,
/// otherwise the status mapped from the error. The handler keeps running
/// if the connection is dropped first.
pub async fn handle_webhook(
    AxumState(state): AxumState<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<&'static str> {
    let delivery = header(&headers, DELIVERY_HEADER).unwrap_or("-");
    let event_type = header(&headers, EVENT_HEADER);
    debug!("Delivery {} ({:?}), {} bytes", delivery, event_type, body.len());

    // The algorithm comes from the header's own prefix
    let signature = header(&headers, SIGNATURE_HEADER);
    if let Err(e) = state.verifier.verify(signature, &body) {
        error!("Rejected delivery {}: {}", delivery, e);
        return Err(e);
    }

    // Handled on its own task so a sender hanging up does not cancel the build
    let router = state.router.clone();
    let event_type = event_type.map(str::to_string);
    let handling = tokio::spawn(async move { router.route(event_type.as_deref(), &body).await });
    let result = handling.await.unwrap_or_else(|e| {
        error!("Delivery {} handler task failed: {}", delivery, e);
        Err(BuilderError::TaskFailed(e.to_string()))
    });

    match result {
        Ok(()) => {
            info!("Delivery {} handled", delivery);
            Ok("ok")
        }
        Err(e @ BuilderError::NotFound(_)) => {
            info!("Delivery {}: {}", delivery, e);
            Err(e)
        }
        Err(e) => {
            error!("Delivery {} failed: {}", delivery, e);
            Err(e)
        }
    }
}
