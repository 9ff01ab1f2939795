//! Protocol error model.

use thiserror::Error;

/// Result type used across the protocol layer.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Permanent validation failure of an inbound agent-session event.
///
/// Every variant maps to a client error at the HTTP boundary; none of them is
/// worth retrying.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The payload was not a JSON agent-session event.
    #[error("decode agent session event: {0}")]
    Decode(String),

    #[error("unsupported agent session event payloadVersion: {0}")]
    UnsupportedPayloadVersion(i64),

    #[error("unknown agent session event action: {0:?}")]
    UnknownAction(String),

    #[error("unknown agent session state: {0:?}")]
    UnknownSessionState(String),

    #[error("prompted agent session event requires prompt agentActivity")]
    PromptedEventRequiresPromptActivity,

    #[error("activity body is required")]
    ActivityBodyRequired,

    #[error("action label is required")]
    ActionLabelRequired,

    #[error("action parameter is required")]
    ActionParameterRequired,

    #[error("unknown agent activity content type: {0:?}")]
    UnknownContentType(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl ProtocolError {
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
