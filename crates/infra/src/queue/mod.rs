//! Durable job queue.
//!
//! The queue file is the sole source of truth for "a job was accepted": one
//! JSON-encoded [`Job`](sessionflow_events::Job) per line, strictly appended,
//! single writer, single reader.

pub mod jsonl;

pub use jsonl::JsonlQueue;
