use axum::{
    Json,
    body::Bytes,
    extract::{Extension, rejection::BytesRejection},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use sessionflow_core::decode_event;
use sessionflow_events::{DispatchError, Job};

use crate::app::WebhookState;
use crate::app::dto::AcceptedResponse;
use crate::app::errors::{self, json_error};
use crate::context::DeliveryContext;

/// Accept one agent-session webhook.
///
/// 202 means the job was handed to the dispatcher, not that it is on disk.
pub async fn receive(
    method: Method,
    Extension(state): Extension<WebhookState>,
    Extension(delivery): Extension<DeliveryContext>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    if method != Method::POST {
        return errors::method_not_allowed();
    }

    let body = match body {
        Ok(body) => body,
        Err(rejection) => return errors::body_rejection_to_response(rejection),
    };

    let event = match decode_event(&body) {
        Ok(event) => event,
        Err(err) => {
            warn!(delivery_id = ?delivery.delivery_id(), error = %err, "webhook rejected");
            return json_error(StatusCode::BAD_REQUEST, "invalid_event", err.to_string());
        }
    };

    let job = match Job::from_delivery(event, &body, delivery.delivery_id(), delivery.received_at())
    {
        Ok(job) => job,
        Err(err) => return json_error(StatusCode::BAD_REQUEST, "invalid_event", err.to_string()),
    };

    let Some(dispatcher) = &state.dispatcher else {
        return json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "dispatcher_unavailable",
            "webhook dispatcher is not configured",
        );
    };

    let job_id = job.id.clone();
    let session_id = job.session_id.clone();
    let idempotency_key = job.idempotency_key.clone();

    let ctx = CancellationToken::new();
    let dispatched =
        match tokio::time::timeout(state.dispatch_timeout, dispatcher.dispatch(&ctx, job)).await {
            Ok(result) => result,
            Err(_) => {
                ctx.cancel();
                Err(DispatchError::TimedOut)
            }
        };

    match dispatched {
        Ok(()) => {
            info!(
                job_id = %job_id,
                session_id = %session_id,
                idempotency_key = %idempotency_key,
                delivery_id = ?delivery.delivery_id(),
                "webhook accepted"
            );
            (StatusCode::ACCEPTED, Json(AcceptedResponse::new(job_id))).into_response()
        }
        Err(err) => {
            warn!(job_id = %job_id, session_id = %session_id, error = %err, "webhook dispatch failed");
            errors::dispatch_error_to_response(err)
        }
    }
}
