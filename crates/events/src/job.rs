//! Queued job record and its JSONL line codec.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use thiserror::Error;

use sessionflow_core::AgentSessionEvent;

use crate::contract::{build_idempotency_key, build_session_step};

/// Version of the queue record layout written by this build.
pub const JOB_CONTRACT_VERSION: u32 = 1;

/// Unit of work derived once per accepted webhook delivery.
///
/// This is what is appended to the durable queue; a job counts as accepted as
/// soon as its line is on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    #[serde(default)]
    pub id: String,
    /// Defaults to 0 when absent so that decoding rejects it instead of guessing.
    #[serde(default)]
    pub contract_version: u32,
    #[serde(default)]
    pub idempotency_key: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub session_step: String,
    /// Transport-level delivery id; never part of the job identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_id: Option<String>,
    #[serde(default)]
    pub received_at: DateTime<Utc>,
    #[serde(default)]
    pub event: AgentSessionEvent,
    /// Original webhook body.
    #[serde(default)]
    pub payload: RawPayload,
}

/// Webhook body kept as the JSON text that was received.
///
/// Key order, number spelling and fields this build does not model are all
/// preserved, so a consumer sees what the sender sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawPayload(Box<RawValue>);

impl RawPayload {
    /// Fails if `body` is not a single JSON value.
    pub fn from_body(body: &[u8]) -> Result<Self, serde_json::Error> {
        let raw: &RawValue = serde_json::from_slice(body)?;
        let text = raw.get();
        if !text.contains(['\n', '\r']) {
            return Ok(Self(raw.to_owned()));
        }
        // Line breaks in valid JSON are whitespace between tokens; a queue
        // record must stay on one line.
        Ok(Self(RawValue::from_string(text.replace(['\n', '\r'], " "))?))
    }

    pub fn get(&self) -> &str {
        self.0.get()
    }

    pub fn is_null(&self) -> bool {
        self.get() == "null"
    }
}

impl Default for RawPayload {
    fn default() -> Self {
        Self(RawValue::NULL.to_owned())
    }
}

impl PartialEq for RawPayload {
    fn eq(&self, other: &Self) -> bool {
        self.get() == other.get()
    }
}

/// Why a queue line could not be turned back into a [`Job`].
#[derive(Debug, Error)]
pub enum JobDecodeError {
    #[error("decode queued job line: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("decode queued job line: missing job identifiers")]
    MissingIdentifiers,

    #[error("unsupported queued job contract version {found}")]
    UnsupportedContractVersion { found: u32 },
}

impl Job {
    /// Build the job for a validated event and its raw body.
    ///
    /// Fails only if `payload` is not JSON, which cannot happen for a body the
    /// event was decoded from.
    pub fn from_delivery(
        event: AgentSessionEvent,
        payload: &[u8],
        delivery_id: Option<&str>,
        received_at: DateTime<Utc>,
    ) -> Result<Self, serde_json::Error> {
        let session_step = build_session_step(&event, payload);
        let idempotency_key = build_idempotency_key(&session_step);
        let id = match event.id.trim() {
            "" => idempotency_key.clone(),
            id => id.to_string(),
        };
        let delivery_id = delivery_id
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string);

        Ok(Self {
            id,
            contract_version: JOB_CONTRACT_VERSION,
            idempotency_key,
            session_id: event.session_id().to_string(),
            session_step,
            delivery_id,
            received_at,
            payload: RawPayload::from_body(payload)?,
            event,
        })
    }

    /// Serialize as one queue line, trailing newline included.
    pub fn encode_line(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }

    /// Parse one queue line (surrounding whitespace allowed).
    pub fn decode_line(line: &[u8]) -> Result<Self, JobDecodeError> {
        let job: Job = serde_json::from_slice(line.trim_ascii())?;

        if job.id.trim().is_empty()
            && job.idempotency_key.trim().is_empty()
            && job.session_id.trim().is_empty()
        {
            return Err(JobDecodeError::MissingIdentifiers);
        }

        if job.contract_version != JOB_CONTRACT_VERSION {
            return Err(JobDecodeError::UnsupportedContractVersion {
                found: job.contract_version,
            });
        }

        Ok(job)
    }
}
