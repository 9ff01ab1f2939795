use axum::extract::rejection::BytesRejection;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::IntoResponse;
use serde_json::json;

use sessionflow_events::DispatchError;

/// Backpressure and shutdown are 503 so the sender retries; a failed queue
/// write is 500.
pub fn dispatch_error_to_response(err: DispatchError) -> axum::response::Response {
    let message = err.to_string();
    match err {
        DispatchError::QueueFull => json_error(StatusCode::SERVICE_UNAVAILABLE, "queue_full", message),
        DispatchError::Closed => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "dispatcher_closed", message)
        }
        DispatchError::Cancelled | DispatchError::TimedOut => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "dispatch_unavailable", message)
        }
        DispatchError::Sink(_) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "queue_write_failed", message)
        }
    }
}

pub fn body_rejection_to_response(rejection: BytesRejection) -> axum::response::Response {
    if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        json_error(
            StatusCode::PAYLOAD_TOO_LARGE,
            "payload_too_large",
            rejection.body_text(),
        )
    } else {
        json_error(StatusCode::BAD_REQUEST, "unreadable_body", rejection.body_text())
    }
}

pub fn method_not_allowed() -> axum::response::Response {
    let mut response = json_error(
        StatusCode::METHOD_NOT_ALLOWED,
        "method_not_allowed",
        "only POST is accepted",
    );
    response
        .headers_mut()
        .insert(header::ALLOW, HeaderValue::from_static("POST"));
    response
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
