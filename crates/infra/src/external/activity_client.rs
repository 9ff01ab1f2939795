//! Idempotent GraphQL client for agent activities and session updates.
//!
//! Every activity carries a client-chosen id derived from its idempotency key
//! ([`ActivityId`]), so a retried mutation collapses onto the record the first
//! attempt created.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use sessionflow_core::{ActivityContentType, ActivityId, ExternalUrl, ProtocolError};

const CREATE_AGENT_ACTIVITY_MUTATION: &str = r#"
mutation createAgentActivity($input: AgentActivityCreateInput!) {
  agentActivityCreate(input: $input) {
    success
    agentActivity {
      id
    }
  }
}
"#;

const UPDATE_AGENT_SESSION_MUTATION: &str = r#"
mutation updateAgentSession($id: String!, $input: AgentSessionUpdateInput!) {
  agentSessionUpdate(id: $id, input: $input) {
    success
    agentSession {
      id
    }
  }
}
"#;

const ACTIVITY_OPERATION: &str = "agent activity mutation";
const SESSION_OPERATION: &str = "agent session mutation";

/// Upper bound on how much of a response body is read.
pub const MAX_RESPONSE_BYTES: usize = 1 << 20;

#[derive(Debug, Error)]
pub enum ActivityError {
    #[error("agent activity endpoint is required")]
    EndpointRequired,

    #[error("agent activity token is required")]
    TokenRequired,

    #[error("agent session id is required")]
    SessionIdRequired,

    #[error("idempotency key is required")]
    IdempotencyKeyRequired,

    /// Content failed the same rules applied to inbound activities.
    #[error(transparent)]
    Content(#[from] ProtocolError),

    #[error("send {operation}: {source}")]
    Transport {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{operation} http {status}: {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },

    #[error("{operation} graphql errors: {messages}")]
    GraphQl {
        operation: &'static str,
        messages: String,
    },

    #[error("{operation} unsuccessful")]
    Unsuccessful { operation: &'static str },

    #[error("{operation} missing {what} id")]
    MissingIdentifier {
        operation: &'static str,
        what: &'static str,
    },

    #[error("decode {operation} response: {source}")]
    Decode {
        operation: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{operation} cancelled")]
    Cancelled { operation: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThoughtActivity {
    pub session_id: String,
    pub body: String,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionActivity {
    pub session_id: String,
    pub action: String,
    pub parameter: String,
    pub result: Option<String>,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseActivity {
    pub session_id: String,
    pub body: String,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionExternalUrls {
    pub session_id: String,
    pub external_urls: Vec<ExternalUrl>,
}

/// Outbound activity operations on an agent session.
///
/// Emit calls return the remote activity id.
#[async_trait]
pub trait ActivityEmitter: Send + Sync {
    async fn emit_thought(
        &self,
        ctx: &CancellationToken,
        input: &ThoughtActivity,
    ) -> Result<String, ActivityError>;

    async fn emit_action(
        &self,
        ctx: &CancellationToken,
        input: &ActionActivity,
    ) -> Result<String, ActivityError>;

    async fn emit_response(
        &self,
        ctx: &CancellationToken,
        input: &ResponseActivity,
    ) -> Result<String, ActivityError>;

    async fn update_session_external_urls(
        &self,
        ctx: &CancellationToken,
        input: &SessionExternalUrls,
    ) -> Result<(), ActivityError>;
}

#[async_trait]
impl<E> ActivityEmitter for Arc<E>
where
    E: ActivityEmitter + ?Sized,
{
    async fn emit_thought(
        &self,
        ctx: &CancellationToken,
        input: &ThoughtActivity,
    ) -> Result<String, ActivityError> {
        (**self).emit_thought(ctx, input).await
    }

    async fn emit_action(
        &self,
        ctx: &CancellationToken,
        input: &ActionActivity,
    ) -> Result<String, ActivityError> {
        (**self).emit_action(ctx, input).await
    }

    async fn emit_response(
        &self,
        ctx: &CancellationToken,
        input: &ResponseActivity,
    ) -> Result<String, ActivityError> {
        (**self).emit_response(ctx, input).await
    }

    async fn update_session_external_urls(
        &self,
        ctx: &CancellationToken,
        input: &SessionExternalUrls,
    ) -> Result<(), ActivityError> {
        (**self).update_session_external_urls(ctx, input).await
    }
}

#[derive(Debug, Clone)]
pub struct ActivityClientConfig {
    pub endpoint: String,
    pub token: String,
}

impl ActivityClientConfig {
    pub fn new(endpoint: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            token: token.into(),
        }
    }
}

/// GraphQL client with bearer auth.
#[derive(Debug, Clone)]
pub struct AgentActivityClient {
    endpoint: String,
    token: String,
    http: reqwest::Client,
}

impl AgentActivityClient {
    pub fn new(config: ActivityClientConfig) -> Result<Self, ActivityError> {
        Self::with_http_client(config, reqwest::Client::new())
    }

    pub fn with_http_client(
        config: ActivityClientConfig,
        http: reqwest::Client,
    ) -> Result<Self, ActivityError> {
        let endpoint = config.endpoint.trim();
        if endpoint.is_empty() {
            return Err(ActivityError::EndpointRequired);
        }
        let token = config.token.trim();
        if token.is_empty() {
            return Err(ActivityError::TokenRequired);
        }

        Ok(Self {
            endpoint: endpoint.to_string(),
            token: token.to_string(),
            http,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn create_activity(
        &self,
        ctx: &CancellationToken,
        session_id: &str,
        idempotency_key: &str,
        content: Value,
    ) -> Result<String, ActivityError> {
        let activity_id = ActivityId::from_idempotency_key(idempotency_key);
        let body = json!({
            "query": CREATE_AGENT_ACTIVITY_MUTATION,
            "variables": {
                "input": {
                    "agentSessionId": session_id,
                    "content": content,
                    "id": activity_id.to_string(),
                }
            }
        });

        let data: CreateActivityData = self.execute(ctx, ACTIVITY_OPERATION, &body).await?;
        let result = data.result.unwrap_or_default();
        if !result.success {
            return Err(ActivityError::Unsuccessful {
                operation: ACTIVITY_OPERATION,
            });
        }
        let id = result.node.map(|n| n.id.trim().to_string()).unwrap_or_default();
        if id.is_empty() {
            return Err(ActivityError::MissingIdentifier {
                operation: ACTIVITY_OPERATION,
                what: "activity",
            });
        }

        debug!(session_id, activity_id = %id, idempotency_key, "agent activity created");
        Ok(id)
    }

    /// POST one GraphQL document and decode its `data`.
    ///
    /// GraphQL errors win over the HTTP status; a body-less response decodes
    /// to `T::default()`.
    async fn execute<T>(
        &self,
        ctx: &CancellationToken,
        operation: &'static str,
        body: &Value,
    ) -> Result<T, ActivityError>
    where
        T: DeserializeOwned + Default,
    {
        let exchange = async {
            let response = self
                .http
                .post(&self.endpoint)
                .bearer_auth(&self.token)
                .header(reqwest::header::ACCEPT, "application/json")
                .json(body)
                .send()
                .await?;
            let status = response.status();
            let raw = read_limited(response, MAX_RESPONSE_BYTES).await?;
            Ok::<_, reqwest::Error>((status, raw))
        };

        let (status, raw) = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(ActivityError::Cancelled { operation }),
            res = exchange => res.map_err(|source| ActivityError::Transport { operation, source })?,
        };

        let envelope: GraphQlEnvelope<T> = if raw.is_empty() {
            GraphQlEnvelope::default()
        } else {
            serde_json::from_slice(&raw)
                .map_err(|source| ActivityError::Decode { operation, source })?
        };

        if !envelope.errors.is_empty() {
            return Err(ActivityError::GraphQl {
                operation,
                messages: join_graphql_errors(&envelope.errors),
            });
        }

        if !status.is_success() {
            let text = String::from_utf8_lossy(&raw).trim().to_string();
            let body = if text.is_empty() {
                status.canonical_reason().unwrap_or_default().to_string()
            } else {
                text
            };
            return Err(ActivityError::Status {
                operation,
                status: status.as_u16(),
                body,
            });
        }

        Ok(envelope.data.unwrap_or_default())
    }
}

#[async_trait]
impl ActivityEmitter for AgentActivityClient {
    async fn emit_thought(
        &self,
        ctx: &CancellationToken,
        input: &ThoughtActivity,
    ) -> Result<String, ActivityError> {
        validate_base(&input.session_id, &input.idempotency_key)?;
        if input.body.trim().is_empty() {
            return Err(ProtocolError::ActivityBodyRequired.into());
        }

        let content = json!({ "type": ActivityContentType::Thought.as_str(), "body": input.body });
        self.create_activity(ctx, &input.session_id, &input.idempotency_key, content)
            .await
    }

    async fn emit_action(
        &self,
        ctx: &CancellationToken,
        input: &ActionActivity,
    ) -> Result<String, ActivityError> {
        validate_base(&input.session_id, &input.idempotency_key)?;
        if input.action.trim().is_empty() {
            return Err(ProtocolError::ActionLabelRequired.into());
        }
        if input.parameter.trim().is_empty() {
            return Err(ProtocolError::ActionParameterRequired.into());
        }

        let mut content = json!({
            "type": ActivityContentType::Action.as_str(),
            "action": input.action,
            "parameter": input.parameter,
        });
        if let Some(result) = &input.result {
            content["result"] = Value::String(result.clone());
        }
        self.create_activity(ctx, &input.session_id, &input.idempotency_key, content)
            .await
    }

    async fn emit_response(
        &self,
        ctx: &CancellationToken,
        input: &ResponseActivity,
    ) -> Result<String, ActivityError> {
        validate_base(&input.session_id, &input.idempotency_key)?;
        if input.body.trim().is_empty() {
            return Err(ProtocolError::ActivityBodyRequired.into());
        }

        let content = json!({ "type": ActivityContentType::Response.as_str(), "body": input.body });
        self.create_activity(ctx, &input.session_id, &input.idempotency_key, content)
            .await
    }

    async fn update_session_external_urls(
        &self,
        ctx: &CancellationToken,
        input: &SessionExternalUrls,
    ) -> Result<(), ActivityError> {
        if input.session_id.trim().is_empty() {
            return Err(ActivityError::SessionIdRequired);
        }

        let urls = normalized_external_urls(&input.external_urls);
        if urls.is_empty() {
            return Ok(());
        }

        let entries: Vec<Value> = urls
            .iter()
            .map(|u| {
                let mut entry = json!({ "url": u.url });
                if !u.label.is_empty() {
                    entry["label"] = Value::String(u.label.clone());
                }
                entry
            })
            .collect();

        let body = json!({
            "query": UPDATE_AGENT_SESSION_MUTATION,
            "variables": {
                "id": input.session_id,
                "input": { "externalUrls": entries },
            }
        });

        let data: UpdateSessionData = self.execute(ctx, SESSION_OPERATION, &body).await?;
        let result = data.result.unwrap_or_default();
        if !result.success {
            return Err(ActivityError::Unsuccessful {
                operation: SESSION_OPERATION,
            });
        }
        if result.node.is_none_or(|n| n.id.trim().is_empty()) {
            return Err(ActivityError::MissingIdentifier {
                operation: SESSION_OPERATION,
                what: "session",
            });
        }

        debug!(session_id = %input.session_id, urls = urls.len(), "agent session external urls updated");
        Ok(())
    }
}

/// Trim, drop blank URLs, and keep the first entry per URL.
pub fn normalized_external_urls(urls: &[ExternalUrl]) -> Vec<ExternalUrl> {
    let mut seen = HashSet::new();
    urls.iter()
        .filter_map(|candidate| {
            let url = candidate.url.trim();
            if url.is_empty() || !seen.insert(url.to_string()) {
                return None;
            }
            Some(ExternalUrl::new(candidate.label.trim(), url))
        })
        .collect()
}

fn validate_base(session_id: &str, idempotency_key: &str) -> Result<(), ActivityError> {
    if session_id.trim().is_empty() {
        return Err(ActivityError::SessionIdRequired);
    }
    if idempotency_key.trim().is_empty() {
        return Err(ActivityError::IdempotencyKeyRequired);
    }
    Ok(())
}

async fn read_limited(
    mut response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, reqwest::Error> {
    let mut raw = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        let room = limit - raw.len();
        if chunk.len() >= room {
            raw.extend_from_slice(&chunk[..room]);
            break;
        }
        raw.extend_from_slice(&chunk);
    }
    Ok(raw)
}

fn join_graphql_errors(errors: &[GraphQlErrorEntry]) -> String {
    let messages: Vec<&str> = errors
        .iter()
        .map(|e| e.message.trim())
        .filter(|m| !m.is_empty())
        .collect();
    if messages.is_empty() {
        "unknown graphql error".to_string()
    } else {
        messages.join("; ")
    }
}

#[derive(Debug, Deserialize)]
struct GraphQlEnvelope<T> {
    #[serde(default = "Option::default")]
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlErrorEntry>,
}

impl<T> Default for GraphQlEnvelope<T> {
    fn default() -> Self {
        Self {
            data: None,
            errors: Vec::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct GraphQlErrorEntry {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Default, Deserialize)]
struct CreateActivityData {
    #[serde(default, rename = "agentActivityCreate")]
    result: Option<MutationResult>,
}

#[derive(Debug, Default, Deserialize)]
struct UpdateSessionData {
    #[serde(default, rename = "agentSessionUpdate")]
    result: Option<MutationResult>,
}

#[derive(Debug, Default, Deserialize)]
struct MutationResult {
    #[serde(default)]
    success: bool,
    #[serde(default, alias = "agentActivity", alias = "agentSession")]
    node: Option<IdNode>,
}

#[derive(Debug, Default, Deserialize)]
struct IdNode {
    #[serde(default)]
    id: String,
}
