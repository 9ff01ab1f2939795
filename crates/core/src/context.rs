//! Prompt context reconstruction.

use crate::protocol::{ActivityContent, ActivityContentType, AgentActivity, AgentSessionEvent};

/// Rebuild the prompt context for a session turn.
///
/// Only immutable activities are replayed (the prior ones, then the event's own
/// activity). Comment fields can be edited after the fact and are ignored.
pub fn reconstruct_prompt_context(event: &AgentSessionEvent, prior: &[AgentActivity]) -> String {
    let base = event.agent_session.prompt_context.trim();

    let lines: Vec<String> = prior
        .iter()
        .chain(event.agent_activity.as_ref())
        .filter_map(|activity| activity_line(&activity.content))
        .collect();

    if lines.is_empty() {
        return base.to_string();
    }

    let mut parts = Vec::with_capacity(lines.len() + 2);
    if !base.is_empty() {
        parts.push(base.to_string());
    }
    parts.push("Conversation activities:".to_string());
    for (i, line) in lines.iter().enumerate() {
        parts.push(format!("{}. {}", i + 1, line));
    }
    parts.join("\n")
}

fn activity_line(content: &ActivityContent) -> Option<String> {
    let body = content.body.trim();
    match &content.kind {
        ActivityContentType::Action => {
            let action = content.action.trim();
            let parameter = content.parameter.trim();
            if action.is_empty() || parameter.is_empty() {
                return None;
            }
            let result = content.result.as_deref().map(str::trim).unwrap_or_default();
            if result.is_empty() {
                Some(format!("action: {action} | parameter: {parameter}"))
            } else {
                Some(format!(
                    "action: {action} | parameter: {parameter} | result: {result}"
                ))
            }
        }
        kind => {
            if body.is_empty() {
                None
            } else {
                Some(format!("{kind}: {body}"))
            }
        }
    }
}
