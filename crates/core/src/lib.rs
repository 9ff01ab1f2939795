//! `sessionflow-core`: agent-session protocol foundation.
//!
//! This crate contains **pure protocol** primitives (no IO, no async): the
//! webhook event model and its validation rules, deterministic activity ids,
//! and prompt-context reconstruction.

pub mod context;
pub mod error;
pub mod id;
pub mod protocol;

pub use context::reconstruct_prompt_context;
pub use error::{ProtocolError, ProtocolResult};
pub use id::ActivityId;
pub use protocol::{
    ActivityContent, ActivityContentType, AgentActivity, AgentComment, AgentGuidance, AgentIssue,
    AgentSession, AgentSessionEvent, EventAction, ExternalUrl, PAYLOAD_VERSION, SessionState,
    decode_event, session_state_for_activity,
};
