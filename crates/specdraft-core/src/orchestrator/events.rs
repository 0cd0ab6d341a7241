//! Outbound events and orchestrator-level state values
//!
//! The transport boundary consumes `OrchestratorEvent`s from a channel and
//! owns their serialization; the serde shape here is what the CLI's JSON
//! lines mode prints.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::agent::{AgentRole, ExitReason, SessionStatus};
use crate::routing::SplitSummary;

/// Who is currently carrying the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActiveProcess {
    Discovery,
    Review,
}

impl From<ActiveProcess> for AgentRole {
    fn from(process: ActiveProcess) -> Self {
        match process {
            ActiveProcess::Discovery => AgentRole::Discovery,
            ActiveProcess::Review => AgentRole::Review,
        }
    }
}

impl From<AgentRole> for ActiveProcess {
    fn from(role: AgentRole) -> Self {
        match role {
            AgentRole::Discovery => ActiveProcess::Discovery,
            AgentRole::Review => ActiveProcess::Review,
        }
    }
}

/// Advisory phase of the collaboration; only moves forward until reset
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CollaborationState {
    Discovering,
    Reviewing,
    Refining,
}

/// What the orchestrator observed in the collaboration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CollaborationKind {
    /// Discovery produced something that looks like a specification draft
    DraftReady,
    /// Discovery handed work to Review
    ReviewRequested,
    /// Review answered and Discovery is refining
    FeedbackReady,
}

/// Events for the transport boundary
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    ProcessesStarted {
        model: String,
    },
    /// User-visible Discovery text
    DiscoveryMessage {
        content: String,
        timestamp: DateTime<Utc>,
    },
    /// Agent-to-agent traffic, for observability only
    CollaborationMessage {
        from: AgentRole,
        to: AgentRole,
        content: String,
        timestamp: DateTime<Utc>,
    },
    ToolUsage {
        from: AgentRole,
        tool_name: String,
        tool_id: String,
        description: String,
    },
    SpecWritingStarted {
        file_path: String,
        tool_id: String,
    },
    TypingIndicator {
        speaker: AgentRole,
        is_typing: bool,
    },
    CollaborationDetected {
        kind: CollaborationKind,
        from: AgentRole,
        to: AgentRole,
        state: CollaborationState,
    },
    ActiveProcessChanged {
        active: ActiveProcess,
    },
    ProcessExit {
        process: AgentRole,
        reason: ExitReason,
    },
    Error {
        process: Option<AgentRole>,
        message: String,
    },
    ModelChanged {
        model: String,
        display_name: String,
    },
    ProcessesStopped,
    ProcessesReset,
}

/// Snapshot for status displays
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    pub started: bool,
    pub active_process: ActiveProcess,
    pub collaboration_state: CollaborationState,
    pub current_model: String,
    pub review_engaged: bool,
    pub history_len: usize,
    pub discovery: SessionStatus,
    pub review: SessionStatus,
    pub routing: SplitSummary,
}
