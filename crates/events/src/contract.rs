//! Job identity derivation.
//!
//! Everything here is a pure function of the event and its raw payload. Delivery
//! metadata (delivery id, receive time) never participates, so a redelivered
//! event always maps to the same session step and idempotency key.

use sha2::{Digest, Sha256};

use sessionflow_core::{AgentSessionEvent, EventAction};

/// Namespace prefix of every idempotency key. Bump the version suffix when the
/// step format changes.
pub const IDEMPOTENCY_NAMESPACE: &str = "agent-session/v1";

/// Human-traceable composite of session id, action and disambiguator.
///
/// - created: `<session>:created`
/// - prompted: `<session>:prompted:<activity>`, falling back to
///   `<session>:prompted:event:<event>` and then
///   `<session>:prompted:fingerprint:<payload fingerprint>`
///
/// A blank session id is replaced by `session-<payload fingerprint>`.
pub fn build_session_step(event: &AgentSessionEvent, payload: &[u8]) -> String {
    let session_id = step_session_id(event, payload);
    let event_id = event.id.trim();

    match &event.action {
        EventAction::Created => format!("{session_id}:created"),
        EventAction::Prompted => {
            let activity_id = event
                .agent_activity
                .as_ref()
                .map(|a| a.id.trim())
                .unwrap_or_default();
            if !activity_id.is_empty() {
                format!("{session_id}:prompted:{activity_id}")
            } else if !event_id.is_empty() {
                format!("{session_id}:prompted:event:{event_id}")
            } else {
                format!(
                    "{session_id}:prompted:fingerprint:{}",
                    payload_fingerprint(payload)
                )
            }
        }
        EventAction::Unknown(raw) => {
            let action = match raw.trim() {
                "" => "unknown",
                other => other,
            };
            if !event_id.is_empty() {
                format!("{session_id}:{action}:event:{event_id}")
            } else {
                format!(
                    "{session_id}:{action}:fingerprint:{}",
                    payload_fingerprint(payload)
                )
            }
        }
    }
}

pub fn build_idempotency_key(session_step: &str) -> String {
    format!("{IDEMPOTENCY_NAMESPACE}:{}", session_step.trim())
}

/// Hex of the first 8 bytes of `sha256(payload)`.
pub fn payload_fingerprint(payload: &[u8]) -> String {
    let digest = Sha256::digest(payload);
    hex::encode(&digest[..8])
}

fn step_session_id(event: &AgentSessionEvent, payload: &[u8]) -> String {
    match event.session_id() {
        "" => format!("session-{}", payload_fingerprint(payload)),
        id => id.to_string(),
    }
}
