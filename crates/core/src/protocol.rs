//! Agent-session webhook event model.
//!
//! Wire names follow the tracker's camelCase JSON. Enumerated string fields
//! keep values this build does not recognise (`Unknown`) so that validation,
//! not deserialization, decides what is rejected and with which error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, ProtocolResult};

/// The only event payload version this crate understands.
pub const PAYLOAD_VERSION: i64 = 1;

macro_rules! wire_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $wire:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(from = "String", into = "String")]
        pub enum $name {
            $($variant,)+
            /// A value outside the known set (rejected by validation).
            Unknown(String),
        }

        impl $name {
            pub fn as_str(&self) -> &str {
                match self {
                    $(Self::$variant => $wire,)+
                    Self::Unknown(raw) => raw.as_str(),
                }
            }

            pub fn is_known(&self) -> bool {
                !matches!(self, Self::Unknown(_))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::Unknown(String::new())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                match value.as_str() {
                    $($wire => Self::$variant,)+
                    _ => Self::Unknown(value),
                }
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::from(value.to_string())
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                match value {
                    $($name::$variant => $wire.to_string(),)+
                    $name::Unknown(raw) => raw,
                }
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

wire_enum!(
    /// Lifecycle action carried by an agent-session event.
    EventAction {
        Created => "created",
        Prompted => "prompted",
    }
);

wire_enum!(
    /// Tracker-side state of an agent session.
    SessionState {
        Pending => "pending",
        Active => "active",
        AwaitingInput => "awaitingInput",
        Complete => "complete",
        Error => "error",
    }
);

wire_enum!(
    /// Type tag of an activity's content.
    ActivityContentType {
        Thought => "thought",
        Elicitation => "elicitation",
        Action => "action",
        Response => "response",
        Error => "error",
        Prompt => "prompt",
    }
);

/// Inbound webhook notification about an agent session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSessionEvent {
    #[serde(default)]
    pub id: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub action: EventAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub payload_version: i64,
    #[serde(default)]
    pub agent_session: AgentSession,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_activity: Option<AgentActivity>,
    /// Mutable comment history; carried for traceability, never used to
    /// rebuild context.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub previous_comments: Vec<AgentComment>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSession {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub state: SessionState,
    #[serde(default)]
    pub prompt_context: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub external_urls: Vec<ExternalUrl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue: Option<AgentIssue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<AgentComment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance: Option<AgentGuidance>,
}

/// Link shown on the session in the tracker UI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalUrl {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub url: String,
}

impl ExternalUrl {
    pub fn new(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            url: url.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentIssue {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub identifier: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentComment {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentGuidance {
    #[serde(default)]
    pub body: String,
}

/// Immutable utterance attached to a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentActivity {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub content: ActivityContent,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityContent {
    #[serde(default, rename = "type")]
    pub kind: ActivityContentType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub body: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub action: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parameter: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

/// Decode and validate a raw webhook body.
pub fn decode_event(payload: &[u8]) -> ProtocolResult<AgentSessionEvent> {
    let event: AgentSessionEvent =
        serde_json::from_slice(payload).map_err(|e| ProtocolError::decode(e.to_string()))?;
    event.validate()?;
    Ok(event)
}

impl AgentSessionEvent {
    /// Check every protocol invariant, first failure wins.
    pub fn validate(&self) -> ProtocolResult<()> {
        if self.payload_version != PAYLOAD_VERSION {
            return Err(ProtocolError::UnsupportedPayloadVersion(self.payload_version));
        }

        if !self.action.is_known() {
            return Err(ProtocolError::UnknownAction(self.action.to_string()));
        }

        if !self.agent_session.state.is_known() {
            return Err(ProtocolError::UnknownSessionState(
                self.agent_session.state.to_string(),
            ));
        }

        if self.action == EventAction::Prompted {
            let is_prompt = self
                .agent_activity
                .as_ref()
                .is_some_and(|a| a.content.kind == ActivityContentType::Prompt);
            if !is_prompt {
                return Err(ProtocolError::PromptedEventRequiresPromptActivity);
            }
        }

        if let Some(activity) = &self.agent_activity {
            activity.content.validate()?;
        }

        Ok(())
    }

    pub fn is_created(&self) -> bool {
        self.action == EventAction::Created
    }

    pub fn is_prompted(&self) -> bool {
        self.action == EventAction::Prompted
    }

    /// Trimmed id of the session this event belongs to.
    pub fn session_id(&self) -> &str {
        self.agent_session.id.trim()
    }
}

impl ActivityContent {
    pub fn validate(&self) -> ProtocolResult<()> {
        match &self.kind {
            ActivityContentType::Thought
            | ActivityContentType::Elicitation
            | ActivityContentType::Response
            | ActivityContentType::Error
            | ActivityContentType::Prompt => {
                if self.body.trim().is_empty() {
                    return Err(ProtocolError::ActivityBodyRequired);
                }
            }
            ActivityContentType::Action => {
                if self.action.trim().is_empty() {
                    return Err(ProtocolError::ActionLabelRequired);
                }
                if self.parameter.trim().is_empty() {
                    return Err(ProtocolError::ActionParameterRequired);
                }
            }
            ActivityContentType::Unknown(raw) => {
                return Err(ProtocolError::UnknownContentType(raw.clone()));
            }
        }
        Ok(())
    }
}

/// Session state the tracker moves to after an activity of `kind`.
pub fn session_state_for_activity(kind: &ActivityContentType) -> SessionState {
    match kind {
        ActivityContentType::Elicitation => SessionState::AwaitingInput,
        ActivityContentType::Response => SessionState::Complete,
        ActivityContentType::Error => SessionState::Error,
        _ => SessionState::Active,
    }
}
