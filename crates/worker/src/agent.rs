//! Coding-agent execution.
//!
//! The worker hands every session step to an [`AgentRunner`]. The production
//! runner shells out to a CLI agent, feeding the prompt on stdin and keeping a
//! per-task log that is linked back onto the session.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use sessionflow_core::ExternalUrl;

pub const RUNNER_LOG_LABEL: &str = "Runner log";
const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRequest {
    /// Filesystem-safe name for this run, also used for its log file.
    pub task_id: String,
    pub session_id: String,
    pub prompt: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AgentStatus {
    #[default]
    Completed,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentOutcome {
    pub status: AgentStatus,
    pub reason: String,
    pub log_path: Option<PathBuf>,
    pub external_urls: Vec<ExternalUrl>,
}

impl AgentOutcome {
    pub fn completed() -> Self {
        Self::default()
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: AgentStatus::Failed,
            reason: reason.into(),
            ..Self::default()
        }
    }

    /// Failure description for a failed run, `None` when it completed.
    pub fn failure(&self) -> Option<String> {
        match self.status {
            AgentStatus::Completed => None,
            AgentStatus::Failed => {
                let reason = self.reason.trim();
                Some(if reason.is_empty() {
                    "agent run failed".to_string()
                } else {
                    reason.to_string()
                })
            }
        }
    }
}

/// Executes one prompt for a session.
///
/// `Err` means the run could not be carried out at all; a run that happened
/// but did not succeed is an `Ok` outcome with [`AgentStatus::Failed`].
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn run(
        &self,
        ctx: &CancellationToken,
        request: &AgentRequest,
    ) -> anyhow::Result<AgentOutcome>;
}

#[async_trait]
impl<R> AgentRunner for Arc<R>
where
    R: AgentRunner + ?Sized,
{
    async fn run(
        &self,
        ctx: &CancellationToken,
        request: &AgentRequest,
    ) -> anyhow::Result<AgentOutcome> {
        (**self).run(ctx, request).await
    }
}

#[derive(Debug, Error)]
pub enum CommandRunnerError {
    #[error("agent command is empty")]
    EmptyCommand,

    #[error("spawn agent command {program:?}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("wait for agent command: {0}")]
    Wait(#[source] std::io::Error),

    #[error("agent run cancelled")]
    Cancelled,

    #[error("runner timeout after {0:?}")]
    TimedOut(Duration),

    #[error("write runner log {}: {source}", .path.display())]
    Log {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Runs an external agent CLI once per request.
#[derive(Debug, Clone)]
pub struct CommandAgentRunner {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    log_dir: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl CommandAgentRunner {
    pub fn new(command: Vec<String>) -> Result<Self, CommandRunnerError> {
        let mut parts = command
            .into_iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());
        let program = parts.next().ok_or(CommandRunnerError::EmptyCommand)?;

        Ok(Self {
            program,
            args: parts.collect(),
            working_dir: None,
            log_dir: None,
            timeout: None,
        })
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        if !timeout.is_zero() {
            self.timeout = Some(timeout);
        }
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    async fn execute(
        &self,
        ctx: &CancellationToken,
        request: &AgentRequest,
    ) -> Result<Output, CommandRunnerError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .env("SESSIONFLOW_SESSION_ID", &request.session_id)
            .env("SESSIONFLOW_TASK_ID", &request.task_id)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|source| CommandRunnerError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        // Fed from its own task so a chatty child can't deadlock on a full pipe.
        let stdin = child.stdin.take();
        let prompt = request.prompt.clone();
        let feeder = tokio::spawn(async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(prompt.as_bytes()).await?;
                stdin.shutdown().await?;
            }
            Ok::<_, std::io::Error>(())
        });

        let limit = self.timeout.unwrap_or(Duration::MAX);
        // Dropping the wait future drops the child, which kills it.
        let output = tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(CommandRunnerError::Cancelled),
            res = tokio::time::timeout(limit, child.wait_with_output()) => match res {
                Ok(out) => out.map_err(CommandRunnerError::Wait),
                Err(_) => Err(CommandRunnerError::TimedOut(limit)),
            },
        };

        match feeder.await {
            Ok(Err(err)) => debug!(task_id = %request.task_id, error = %err, "agent did not read the full prompt"),
            Err(err) => debug!(task_id = %request.task_id, error = %err, "prompt feeder task failed"),
            Ok(Ok(())) => {}
        }

        output
    }

    async fn write_log(
        &self,
        request: &AgentRequest,
        output: &Output,
    ) -> Result<Option<PathBuf>, CommandRunnerError> {
        let Some(dir) = &self.log_dir else {
            return Ok(None);
        };
        let path = dir.join(format!("{}.log", request.task_id));
        let log_err = |source| CommandRunnerError::Log {
            path: path.clone(),
            source,
        };

        tokio::fs::create_dir_all(dir).await.map_err(log_err)?;

        let mut contents = Vec::with_capacity(output.stdout.len() + output.stderr.len() + 64);
        contents.extend_from_slice(&output.stdout);
        if !output.stderr.is_empty() {
            contents.extend_from_slice(b"\n--- stderr ---\n");
            contents.extend_from_slice(&output.stderr);
        }
        tokio::fs::write(&path, contents).await.map_err(log_err)?;

        let path = tokio::fs::canonicalize(&path).await.unwrap_or(path);
        Ok(Some(path))
    }
}

#[async_trait]
impl AgentRunner for CommandAgentRunner {
    async fn run(
        &self,
        ctx: &CancellationToken,
        request: &AgentRequest,
    ) -> anyhow::Result<AgentOutcome> {
        info!(
            task_id = %request.task_id,
            session_id = %request.session_id,
            program = %self.program,
            "starting agent command"
        );

        let output = self.execute(ctx, request).await?;
        let log_path = self.write_log(request, &output).await?;

        let mut outcome = if output.status.success() {
            AgentOutcome::completed()
        } else {
            AgentOutcome::failed(failure_reason(&output))
        };
        if let Some(path) = log_path {
            outcome
                .external_urls
                .push(ExternalUrl::new(RUNNER_LOG_LABEL, file_url(&path)));
            outcome.log_path = Some(path);
        }

        info!(
            task_id = %request.task_id,
            status = ?outcome.status,
            "agent command finished"
        );
        Ok(outcome)
    }
}

fn failure_reason(output: &Output) -> String {
    let mut reason = format!("agent command failed ({})", output.status);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let tail = &lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..];
    if !tail.is_empty() {
        reason.push('\n');
        reason.push_str(&tail.join("\n"));
    }
    reason
}

fn file_url(path: &Path) -> String {
    format!("file://{}", path.display())
}
