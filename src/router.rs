//! Maps `X-GitHub-Event` names to handlers

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{BuilderError, Result};
use crate::webhook::WebhookEvent;

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: WebhookEvent) -> Result<()>;
}

/// Immutable event name to handler table, built once at startup
#[derive(Clone, Default)]
pub struct EventRouter {
    handlers: Arc<HashMap<String, Arc<dyn EventHandler>>>,
}

impl EventRouter {
    pub fn builder() -> EventRouterBuilder {
        EventRouterBuilder::default()
    }

    pub fn handler(&self, event_type: &str) -> Option<Arc<dyn EventHandler>> {
        self.handlers.get(event_type).cloned()
    }

    pub fn events(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Route one delivery: `event_type` comes from the `X-GitHub-Event`
    /// header and `body` is the raw JSON payload.
    pub async fn route(&self, event_type: Option<&str>, body: &[u8]) -> Result<()> {
        let event_type = event_type
            .filter(|name| !name.is_empty())
            .ok_or_else(|| BuilderError::BadRequest("missing X-GitHub-Event header".to_string()))?;

        let handler = self.handler(event_type).ok_or_else(|| {
            warn!("No handler registered for '{}' event", event_type);
            BuilderError::NotFound(event_type.to_string())
        })?;

        let payload: Value = serde_json::from_slice(body).map_err(|e| {
            warn!("Could not parse JSON body: {}", e);
            BuilderError::MalformedPayload(e.to_string())
        })?;

        debug!("Dispatching '{}' event", event_type);
        handler.handle(WebhookEvent::new(event_type, payload)).await
    }
}

#[derive(Default)]
pub struct EventRouterBuilder {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

impl EventRouterBuilder {
    /// Register `handler` for `event_type`, replacing any earlier registration
    pub fn on(mut self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.insert(event_type.into(), handler);
        self
    }

    pub fn build(self) -> EventRouter {
        EventRouter {
            handlers: Arc::new(self.handlers),
        }
    }
}
