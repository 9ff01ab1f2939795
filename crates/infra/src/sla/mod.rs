//! First-thought SLA enforcement for agent sessions.
//!
//! A `created` session must show the user a thought before the deadline. The
//! watchdog races that first thought against a timer and posts an idempotent
//! fallback thought when the deadline wins.

pub mod session_processor;
pub mod timer;
pub mod watchdog;

pub use session_processor::{
    AgentSessionProcessor, ResponseSlaRecorder, SessionProcessError, SessionRunner, SessionStep,
};
pub use timer::{Clock, DeadlineTimer, SystemClock, TokioTimer};
pub use watchdog::{
    DEFAULT_FALLBACK_BODY, DEFAULT_FIRST_THOUGHT_DEADLINE, FirstThoughtSlaConfig,
    FirstThoughtWatchdog, SlaErrorRecorder, SlaOutcome, SlaViolation, ThoughtEmitter,
    WatchdogError, enforce_first_thought_sla, fallback_idempotency_key,
};
