//! Error types for sessions, routing, and the orchestrator

use std::path::PathBuf;

use thiserror::Error;

use crate::agent::AgentRole;

/// Failures surfaced by the external agent service
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The request was cancelled through its token
    #[error("request cancelled")]
    Cancelled,

    /// The agent process could not be started
    #[error("failed to start agent process: {0}")]
    Spawn(#[source] std::io::Error),

    /// Reading from the agent process failed
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The service produced something that is not a valid message
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The agent process exited unsuccessfully
    #[error("agent process exited with {code:?}: {stderr}")]
    ProcessFailed { code: Option<i32>, stderr: String },
}

impl ServiceError {
    /// Whether this is the deliberate cancellation signal rather than a failure
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ServiceError::Cancelled)
    }
}

/// Session-level failures
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{role} session failed to start: {source}")]
    SpawnFailed {
        role: AgentRole,
        #[source]
        source: ServiceError,
    },
}

/// Failures returned by orchestrator operations
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// An operation needs `start_processes` to have run first
    #[error("processes have not been started")]
    NotStarted,

    /// The model id is not in the registry
    #[error("unknown model id: {0}")]
    InvalidModelId(String),

    /// The target agent is still streaming its previous reply
    #[error("{0} agent is still responding")]
    AgentBusy(AgentRole),

    /// Review is only reachable through a marker handoff
    #[error("the review agent cannot be selected directly")]
    ReviewNotSelectable,

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Configuration loading failures
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
