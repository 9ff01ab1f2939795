//! Operator-facing error summaries.
//!
//! Failures that reach a session response (or the worker's stderr) are mapped
//! to a coarse category with a concrete next step.

use std::fmt;

use sessionflow_infra::config::ConfigError;
use sessionflow_infra::external::ActivityError;
use sessionflow_infra::workers::WorkerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Webhook,
    Auth,
    GraphQl,
    Runtime,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Webhook => "webhook",
            Self::Auth => "auth",
            Self::GraphQl => "graphql",
            Self::Runtime => "runtime",
            Self::Unknown => "unknown",
        }
    }

    pub fn remediation(&self) -> &'static str {
        match self {
            Self::Webhook => {
                "Validate webhook payload contract/version and queue records, then replay the affected event."
            }
            Self::Auth => {
                "Set a valid LINEAR_TOKEN (or LINEAR_API_TOKEN), verify workspace access, and retry."
            }
            Self::GraphQl => {
                "Review Linear GraphQL error details and mutation input, then retry once the API issue is resolved."
            }
            Self::Runtime => {
                "Inspect worker runtime logs under runner-logs/, fix the runner issue, and rerun the session step."
            }
            Self::Unknown => {
                "Check worker stderr and session logs, then retry; escalate with full error details if it persists."
            }
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const WEBHOOK_MARKERS: &[&str] = &[
    "webhook",
    "queue file",
    "decode queued job line",
    "contract version",
    "missing job identifiers",
];

const AUTH_MARKERS: &[&str] = &[
    "linear_token",
    "linear_api_token",
    "token is required",
    "unauthorized",
    "forbidden",
    "http 401",
    "http 403",
    "bearer",
    "authorization",
    "permission denied",
];

const GRAPHQL_MARKERS: &[&str] = &[
    "graphql",
    "agent activity mutation unsuccessful",
    "agent activity mutation missing activity id",
    "agent activity mutation http",
];

const RUNTIME_MARKERS: &[&str] = &[
    "run linear session job",
    "runner timeout",
    "opencode stall",
    "deadline exceeded",
    "timed out",
];

/// Category of free-form error text.
pub fn classify_message(message: &str) -> ErrorCategory {
    let lower = message.to_lowercase();
    let hit = |markers: &[&str]| markers.iter().any(|m| lower.contains(m));

    if hit(WEBHOOK_MARKERS) {
        ErrorCategory::Webhook
    } else if hit(AUTH_MARKERS) {
        ErrorCategory::Auth
    } else if hit(GRAPHQL_MARKERS) {
        ErrorCategory::GraphQl
    } else if hit(RUNTIME_MARKERS) {
        ErrorCategory::Runtime
    } else {
        ErrorCategory::Unknown
    }
}

/// Category of an error, preferring typed causes over message matching.
pub fn classify(err: &anyhow::Error) -> ErrorCategory {
    for cause in err.chain() {
        if let Some(activity) = cause.downcast_ref::<ActivityError>() {
            match activity {
                ActivityError::TokenRequired => return ErrorCategory::Auth,
                ActivityError::Status { status: 401 | 403, .. } => return ErrorCategory::Auth,
                ActivityError::GraphQl { .. }
                | ActivityError::Unsuccessful { .. }
                | ActivityError::MissingIdentifier { .. } => return ErrorCategory::GraphQl,
                _ => {}
            }
        }
        if let Some(ConfigError::MissingToken) = cause.downcast_ref::<ConfigError>() {
            return ErrorCategory::Auth;
        }
        if let Some(worker) = cause.downcast_ref::<WorkerError>() {
            if matches!(worker.category(), "queue" | "record") {
                return ErrorCategory::Webhook;
            }
        }
    }
    classify_message(&format!("{err:#}"))
}

/// Three-line summary: category, normalized cause, next step.
pub fn format_actionable_error(err: &anyhow::Error) -> String {
    let category = classify(err);
    format!(
        "Category: {category}\nCause: {}\nNext step: {}",
        normalize_cause(&format!("{err:#}")),
        category.remediation()
    )
}

/// Collapse multi-line error text onto one line, dropping bare exit codes.
pub fn normalize_cause(raw: &str) -> String {
    let parts: Vec<&str> = raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !is_exit_status(l))
        .map(trim_exit_status_suffix)
        .filter(|l| !l.is_empty())
        .collect();
    if parts.is_empty() {
        return raw.trim().to_string();
    }
    parts.join(" | ")
}

fn is_exit_status(line: &str) -> bool {
    let Some(rest) = line.strip_prefix("exit status") else {
        return false;
    };
    let code = rest.trim_start_matches(':').trim();
    !code.is_empty() && code.chars().all(|c| c.is_ascii_digit())
}

fn trim_exit_status_suffix(line: &str) -> &str {
    match line.rfind(": exit status") {
        Some(idx) if is_exit_status(&line[idx + 2..]) => line[..idx].trim_end(),
        _ => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn message_markers_pick_the_category() {
        let cases = [
            ("decode queued job line 4: eof", ErrorCategory::Webhook),
            ("unsupported job contract version 0", ErrorCategory::Webhook),
            ("LINEAR_TOKEN is not set", ErrorCategory::Auth),
            ("agent activity mutation http 403: Forbidden", ErrorCategory::Auth),
            ("agent activity mutation graphql errors: bad", ErrorCategory::GraphQl),
            ("agent activity mutation unsuccessful", ErrorCategory::GraphQl),
            ("run linear session job: agent exploded", ErrorCategory::Runtime),
            ("request timed out", ErrorCategory::Runtime),
            ("disk on fire", ErrorCategory::Unknown),
        ];
        for (message, want) in cases {
            assert_eq!(classify_message(message), want, "{message}");
        }
    }

    #[test]
    fn typed_activity_errors_win_over_text() {
        let err = anyhow::Error::new(ActivityError::Status {
            operation: "agent activity mutation",
            status: 401,
            body: "nope".into(),
        })
        .context("emit start thought");
        assert_eq!(classify(&err), ErrorCategory::Auth);

        let err = anyhow::Error::new(ActivityError::Unsuccessful {
            operation: "agent session mutation",
        });
        assert_eq!(classify(&err), ErrorCategory::GraphQl);
    }

    #[test]
    fn missing_token_config_is_auth() {
        let err = anyhow::Error::new(ConfigError::MissingToken);
        assert_eq!(classify(&err), ErrorCategory::Auth);
    }

    #[test]
    fn formats_three_lines_with_normalized_cause() {
        let err = anyhow!("agent command failed: exit status 1\n\n  stack line one  \nexit status 1\n");
        assert_eq!(
            format_actionable_error(&err),
            "Category: unknown\n\
             Cause: agent command failed | stack line one\n\
             Next step: Check worker stderr and session logs, then retry; escalate with full error details if it persists."
        );
    }

    #[test]
    fn context_chain_is_kept_in_the_cause() {
        let err = anyhow!("runner timeout after 30s").context("run linear session job");
        let formatted = format_actionable_error(&err);
        assert!(formatted.starts_with("Category: runtime\n"));
        assert!(formatted.contains("Cause: run linear session job: runner timeout after 30s\n"));
    }

    #[test]
    fn normalize_keeps_text_when_everything_is_filtered() {
        assert_eq!(normalize_cause("exit status 2"), "exit status 2");
        assert_eq!(normalize_cause("a\nb"), "a | b");
    }
}
