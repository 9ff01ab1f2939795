//! HTTP application wiring (Axum router + service wiring).
//!
//! - `services.rs`: durable queue + dispatcher construction
//! - `routes/`: HTTP handlers
//! - `dto.rs`: response bodies
//! - `errors.rs`: consistent error responses

use std::sync::Arc;
use std::time::Duration;

use axum::{Extension, Router, extract::DefaultBodyLimit, routing::get};

use sessionflow_events::Dispatcher;
use sessionflow_infra::config::{DEFAULT_MAX_BODY_BYTES, DEFAULT_WEBHOOK_PATH, SessionflowConfig};

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Upper bound on one dispatch attempt before the request gives up with 503.
pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub path: String,
    pub max_body_bytes: usize,
    pub dispatch_timeout: Duration,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_WEBHOOK_PATH.to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            dispatch_timeout: DEFAULT_DISPATCH_TIMEOUT,
        }
    }
}

impl WebhookConfig {
    pub fn from_config(config: &SessionflowConfig) -> Self {
        Self::default()
            .with_path(&config.webhook_path)
            .with_max_body_bytes(config.max_body_bytes)
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    pub fn with_dispatch_timeout(mut self, dispatch_timeout: Duration) -> Self {
        self.dispatch_timeout = dispatch_timeout;
        self
    }
}

/// Shared by every webhook request.
#[derive(Clone)]
pub struct WebhookState {
    /// `None` until a queue is wired; requests then get 503.
    pub dispatcher: Option<Arc<dyn Dispatcher>>,
    pub dispatch_timeout: Duration,
}

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(dispatcher: Option<Arc<dyn Dispatcher>>, config: WebhookConfig) -> Router {
    let state = WebhookState {
        dispatcher,
        dispatch_timeout: config.dispatch_timeout,
    };

    let webhook = routes::router(&config.path)
        .layer(Extension(state))
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(axum::middleware::from_fn(
            middleware::delivery_context_middleware,
        ));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(webhook)
}
