//! Job contract and delivery seams.
//!
//! - `contract`: stable identity of an inbound event (session step, idempotency key)
//! - `job`: the queued unit of work and its line codec
//! - `sink`: traits connecting ingestion, the durable queue, and consumers
//! - `in_memory_sink`: recording sink for tests/dev

pub mod contract;
pub mod in_memory_sink;
pub mod job;
pub mod sink;

pub use contract::{
    IDEMPOTENCY_NAMESPACE, build_idempotency_key, build_session_step, payload_fingerprint,
};
pub use in_memory_sink::InMemoryQueueSink;
pub use job::{JOB_CONTRACT_VERSION, Job, JobDecodeError, RawPayload};
pub use sink::{DispatchError, Dispatcher, JobProcessor, QueueSink, SinkError};
