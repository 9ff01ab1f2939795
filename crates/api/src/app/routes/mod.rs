use axum::{Router, routing::any};

pub mod system;
pub mod webhook;

/// Webhook route; method filtering happens in the handler so that every
/// non-POST gets the same JSON 405.
pub fn router(webhook_path: &str) -> Router {
    Router::new().route(webhook_path, any(webhook::receive))
}
