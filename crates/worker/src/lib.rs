//! Queue consumer side: turns queued session jobs into agent runs and
//! user-visible session activities.

pub mod agent;
pub mod processor;
pub mod prompt;
pub mod remediation;
pub mod service;

pub use agent::{
    AgentOutcome, AgentRequest, AgentRunner, AgentStatus, CommandAgentRunner, CommandRunnerError,
};
pub use processor::SessionJobProcessor;
pub use remediation::{ErrorCategory, format_actionable_error};
