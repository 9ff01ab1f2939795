//! Text the worker sends to the agent and posts back onto the session.

use sessionflow_core::{EventAction, reconstruct_prompt_context};
use sessionflow_infra::sla::SessionStep;

use crate::remediation::format_actionable_error;

pub const CONTINUE_INSTRUCTION: &str = "Continue handling the Linear AgentSession request.";
const DEFAULT_TASK_ID: &str = "linear-session-job";

/// Assemble the agent prompt for one session step.
pub fn build_job_prompt(step: &SessionStep<'_>) -> String {
    let event = step.event;
    let mut parts: Vec<String> = Vec::new();

    let context = match event.action {
        EventAction::Prompted => {
            let rebuilt = reconstruct_prompt_context(event, &[]);
            if rebuilt.trim().is_empty() {
                event.agent_session.prompt_context.clone()
            } else {
                rebuilt
            }
        }
        _ => event.agent_session.prompt_context.clone(),
    };
    push_trimmed(&mut parts, &context);

    match event.action {
        EventAction::Created => {
            if let Some(comment) = &event.agent_session.comment {
                let body = comment.body.trim();
                if !body.is_empty() {
                    parts.push(format!("Initial request:\n{body}"));
                }
            }
        }
        EventAction::Prompted => {
            if let Some(activity) = &event.agent_activity {
                let body = activity.content.body.trim();
                if !body.is_empty() {
                    parts.push(format!("Follow-up input:\n{body}"));
                }
            }
            parts.push(CONTINUE_INSTRUCTION.to_string());
        }
        _ => {}
    }

    if !parts.is_empty() {
        return parts.join("\n\n");
    }

    match step.payload.filter(|p| !p.is_null()).map(|p| p.get().trim()) {
        Some(raw) if !raw.is_empty() => raw.to_string(),
        _ => CONTINUE_INSTRUCTION.to_string(),
    }
}

fn push_trimmed(parts: &mut Vec<String>, text: &str) {
    let text = text.trim();
    if !text.is_empty() {
        parts.push(text.to_string());
    }
}

/// Body of the thought posted when the worker picks a step up.
pub fn thought_body(action: &EventAction) -> &'static str {
    match action {
        EventAction::Created => "Processing queued Linear session request.",
        EventAction::Prompted => "Processing queued follow-up prompt for Linear session.",
        _ => "Processing queued Linear session step.",
    }
}

/// Body of the final response activity for a step.
pub fn response_body(action: &str, failure: Option<&anyhow::Error>) -> String {
    let action = match action.trim() {
        "" => "queued",
        a => a,
    };
    match failure {
        None => format!("Finished processing Linear session {action} step."),
        Some(err) => format!(
            "Failed processing Linear session {action} step.\n{}",
            format_actionable_error(err)
        ),
    }
}

/// Filesystem-safe task name derived from an idempotency key.
pub fn sanitize_task_id(key: &str) -> String {
    let sanitized: String = key
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | ' ' => '_',
            c => c,
        })
        .collect();
    if sanitized.is_empty() {
        DEFAULT_TASK_ID.to_string()
    } else {
        sanitized
    }
}
