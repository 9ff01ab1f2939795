//! Queue consumers.

pub mod cursor_store;
pub mod queue_worker;

pub use cursor_store::{CursorError, CursorStore, FileCursorStore, InMemoryCursorStore};
pub use queue_worker::{DrainReport, QueueWorker, QueueWorkerConfig, WorkerError};
