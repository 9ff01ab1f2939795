use axum::{
    body::Body,
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use chrono::Utc;

use crate::context::DeliveryContext;

pub const DELIVERY_ID_HEADER: &str = "x-linear-delivery-id";

/// Stamp every request with its [`DeliveryContext`].
pub async fn delivery_context_middleware(mut req: Request<Body>, next: Next) -> Response {
    let context = DeliveryContext::new(delivery_id(req.headers()), Utc::now());
    req.extensions_mut().insert(context);
    next.run(req).await
}

fn delivery_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(DELIVERY_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}
