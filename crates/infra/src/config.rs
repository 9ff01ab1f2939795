//! Environment-driven process configuration shared by both binaries.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::dispatcher::AsyncDispatcherConfig;
use crate::external::ActivityClientConfig;
use crate::sla::FirstThoughtSlaConfig;
use crate::workers::QueueWorkerConfig;

pub const DEFAULT_QUEUE_PATH: &str = "runner-logs/agent-session.jobs.jsonl";
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_WEBHOOK_PATH: &str = "/linear/webhook";
pub const DEFAULT_LINEAR_ENDPOINT: &str = "https://api.linear.app/graphql";
pub const DEFAULT_AGENT_COMMAND: &str = "opencode run";
pub const DEFAULT_MAX_BODY_BYTES: usize = 1 << 20;
pub const DEFAULT_RUNNER_LOG_DIR: &str = "runner-logs";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid {var}={value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("LINEAR_TOKEN (or LINEAR_API_TOKEN) must be set")]
    MissingToken,
}

impl ConfigError {
    fn invalid(var: &'static str, value: &str, reason: &'static str) -> Self {
        Self::Invalid {
            var,
            value: value.to_string(),
            reason,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionflowConfig {
    pub queue_path: PathBuf,
    pub poll_interval: Duration,
    pub once: bool,
    pub listen_addr: SocketAddr,
    pub webhook_path: String,
    pub max_body_bytes: usize,
    pub dispatch_capacity: usize,
    pub first_thought_timeout: Duration,
    pub linear_endpoint: String,
    pub linear_token: Option<String>,
    pub agent_command: Vec<String>,
    pub runner_log_dir: PathBuf,
    /// Upper bound on one agent run; `None` waits indefinitely.
    pub agent_timeout: Option<Duration>,
}

impl Default for SessionflowConfig {
    fn default() -> Self {
        Self {
            queue_path: PathBuf::from(DEFAULT_QUEUE_PATH),
            poll_interval: Duration::from_millis(250),
            once: false,
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            webhook_path: DEFAULT_WEBHOOK_PATH.to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            dispatch_capacity: 64,
            first_thought_timeout: Duration::from_secs(10),
            linear_endpoint: DEFAULT_LINEAR_ENDPOINT.to_string(),
            linear_token: None,
            agent_command: split_command(DEFAULT_AGENT_COMMAND),
            runner_log_dir: PathBuf::from(DEFAULT_RUNNER_LOG_DIR),
            agent_timeout: None,
        }
    }
}

impl SessionflowConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mut config = Self::default();

        if let Some(path) = get("SESSIONFLOW_QUEUE_PATH") {
            config.queue_path = PathBuf::from(path);
        }
        if let Some(raw) = get("SESSIONFLOW_POLL_INTERVAL_MS") {
            config.poll_interval = parse_millis("SESSIONFLOW_POLL_INTERVAL_MS", &raw)?;
        }
        if let Some(raw) = get("SESSIONFLOW_ONCE") {
            config.once = parse_bool("SESSIONFLOW_ONCE", &raw)?;
        }
        if let Some(raw) = get("SESSIONFLOW_LISTEN_ADDR") {
            config.listen_addr = raw.parse().map_err(|_| {
                ConfigError::invalid("SESSIONFLOW_LISTEN_ADDR", &raw, "expected host:port")
            })?;
        }
        if let Some(raw) = get("SESSIONFLOW_WEBHOOK_PATH") {
            if !raw.starts_with('/') {
                return Err(ConfigError::invalid(
                    "SESSIONFLOW_WEBHOOK_PATH",
                    &raw,
                    "must start with '/'",
                ));
            }
            config.webhook_path = raw;
        }
        if let Some(raw) = get("SESSIONFLOW_MAX_BODY_BYTES") {
            config.max_body_bytes = parse_positive("SESSIONFLOW_MAX_BODY_BYTES", &raw)?;
        }
        if let Some(raw) = get("SESSIONFLOW_DISPATCH_CAPACITY") {
            config.dispatch_capacity = parse_positive("SESSIONFLOW_DISPATCH_CAPACITY", &raw)?;
        }
        if let Some(raw) = get("SESSIONFLOW_FIRST_THOUGHT_TIMEOUT_MS") {
            config.first_thought_timeout =
                parse_millis("SESSIONFLOW_FIRST_THOUGHT_TIMEOUT_MS", &raw)?;
        }
        if let Some(endpoint) = get("LINEAR_API_ENDPOINT") {
            config.linear_endpoint = endpoint;
        }
        config.linear_token = get("LINEAR_TOKEN").or_else(|| get("LINEAR_API_TOKEN"));
        if let Some(raw) = get("SESSIONFLOW_AGENT_COMMAND") {
            config.agent_command = split_command(&raw);
        }
        if let Some(dir) = get("SESSIONFLOW_RUNNER_LOG_DIR") {
            config.runner_log_dir = PathBuf::from(dir);
        }
        if let Some(raw) = get("SESSIONFLOW_AGENT_TIMEOUT_MS") {
            config.agent_timeout = Some(parse_millis("SESSIONFLOW_AGENT_TIMEOUT_MS", &raw)?);
        }

        Ok(config)
    }

    pub fn queue_worker_config(&self) -> QueueWorkerConfig {
        QueueWorkerConfig::new(&self.queue_path)
            .with_poll_interval(self.poll_interval)
            .with_once(self.once)
    }

    pub fn dispatcher_config(&self) -> AsyncDispatcherConfig {
        AsyncDispatcherConfig::default().with_capacity(self.dispatch_capacity)
    }

    pub fn sla_config(&self) -> FirstThoughtSlaConfig {
        FirstThoughtSlaConfig::default().with_deadline(self.first_thought_timeout)
    }

    pub fn activity_client_config(&self) -> Result<ActivityClientConfig, ConfigError> {
        let token = self.linear_token.clone().ok_or(ConfigError::MissingToken)?;
        Ok(ActivityClientConfig::new(&self.linear_endpoint, token))
    }
}

fn split_command(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

fn parse_positive(var: &'static str, raw: &str) -> Result<usize, ConfigError> {
    match raw.parse::<usize>() {
        Ok(0) => Err(ConfigError::invalid(var, raw, "must be greater than zero")),
        Ok(n) => Ok(n),
        Err(_) => Err(ConfigError::invalid(var, raw, "expected an integer")),
    }
}

fn parse_millis(var: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    parse_positive(var, raw).map(|ms| Duration::from_millis(ms as u64))
}

fn parse_bool(var: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(var, raw, "expected a boolean")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = SessionflowConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, SessionflowConfig::default());
        assert_eq!(config.listen_addr.to_string(), DEFAULT_LISTEN_ADDR);
        assert_eq!(config.agent_command, vec!["opencode", "run"]);
        assert_eq!(
            config.activity_client_config().unwrap_err(),
            ConfigError::MissingToken
        );
    }

    #[test]
    fn reads_every_variable() {
        let config = SessionflowConfig::from_lookup(lookup(&[
            ("SESSIONFLOW_QUEUE_PATH", "/var/lib/sf/jobs.jsonl"),
            ("SESSIONFLOW_POLL_INTERVAL_MS", "50"),
            ("SESSIONFLOW_ONCE", "TRUE"),
            ("SESSIONFLOW_LISTEN_ADDR", "127.0.0.1:9000"),
            ("SESSIONFLOW_WEBHOOK_PATH", "/hooks/linear"),
            ("SESSIONFLOW_MAX_BODY_BYTES", "2048"),
            ("SESSIONFLOW_DISPATCH_CAPACITY", "8"),
            ("SESSIONFLOW_FIRST_THOUGHT_TIMEOUT_MS", "3000"),
            ("LINEAR_API_ENDPOINT", "http://localhost:4000/graphql"),
            ("LINEAR_API_TOKEN", " lin_api_123 "),
            ("SESSIONFLOW_AGENT_COMMAND", "codex exec --quiet"),
            ("SESSIONFLOW_RUNNER_LOG_DIR", "/var/log/sf"),
            ("SESSIONFLOW_AGENT_TIMEOUT_MS", "600000"),
        ]))
        .unwrap();

        assert_eq!(config.queue_path, PathBuf::from("/var/lib/sf/jobs.jsonl"));
        assert_eq!(config.poll_interval, Duration::from_millis(50));
        assert!(config.once);
        assert_eq!(config.listen_addr.port(), 9000);
        assert_eq!(config.webhook_path, "/hooks/linear");
        assert_eq!(config.max_body_bytes, 2048);
        assert_eq!(config.dispatch_capacity, 8);
        assert_eq!(config.sla_config().deadline, Duration::from_secs(3));
        assert_eq!(config.agent_command, vec!["codex", "exec", "--quiet"]);
        assert_eq!(config.runner_log_dir, PathBuf::from("/var/log/sf"));
        assert_eq!(config.agent_timeout, Some(Duration::from_secs(600)));

        let client = config.activity_client_config().unwrap();
        assert_eq!(client.endpoint, "http://localhost:4000/graphql");
        assert_eq!(client.token, "lin_api_123");

        let worker = config.queue_worker_config();
        assert_eq!(worker.poll_interval, Duration::from_millis(50));
        assert!(worker.once);
    }

    #[test]
    fn primary_token_wins() {
        let config = SessionflowConfig::from_lookup(lookup(&[
            ("LINEAR_TOKEN", "primary"),
            ("LINEAR_API_TOKEN", "secondary"),
        ]))
        .unwrap();
        assert_eq!(config.linear_token.as_deref(), Some("primary"));
    }

    #[test]
    fn rejects_invalid_values() {
        let cases = [
            ("SESSIONFLOW_POLL_INTERVAL_MS", "0"),
            ("SESSIONFLOW_POLL_INTERVAL_MS", "fast"),
            ("SESSIONFLOW_ONCE", "maybe"),
            ("SESSIONFLOW_LISTEN_ADDR", "localhost"),
            ("SESSIONFLOW_WEBHOOK_PATH", "linear/webhook"),
            ("SESSIONFLOW_DISPATCH_CAPACITY", "-1"),
            ("SESSIONFLOW_AGENT_TIMEOUT_MS", "0"),
        ];
        for (var, value) in cases {
            let err = SessionflowConfig::from_lookup(lookup(&[(var, value)])).unwrap_err();
            assert!(
                matches!(&err, ConfigError::Invalid { var: v, .. } if *v == var),
                "{var}={value} gave {err}"
            );
        }
    }
}
