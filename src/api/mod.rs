//! HTTP surface: a single `/` route

pub mod root;
pub mod webhook;

use axum::{Router, extract::DefaultBodyLimit, routing};

use crate::SharedState;

pub use root::root;
pub use webhook::handle_webhook;

/// GitHub caps webhook payloads at 25 MB
pub const MAX_PAYLOAD_BYTES: usize = 25 * 1024 * 1024;

pub fn app(state: SharedState) -> Router {
    Router::new()
        .route("/", routing::get(root).post(handle_webhook))
        .layer(DefaultBodyLimit::max(MAX_PAYLOAD_BYTES))
        .with_state(state)
}
