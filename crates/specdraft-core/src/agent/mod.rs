//! Agent sessions over an external streaming agent service
//!
//! - `service`: the contract every agent backend implements
//! - `claude_cli`: the backend that drives the `claude` binary
//! - `session`: one resumable conversation with start/continue/abort/status

mod claude_cli;
mod roles;
mod service;
mod session;

pub use claude_cli::ClaudeCliService;
pub use roles::AgentRole;
pub use service::{
    AgentService, AssistantContent, AssistantPayload, ContentPart, MessageStream, QueryRequest,
    ServiceMessage,
};
pub use session::{
    AgentSession, CompletionInfo, ExitReason, KillOutcome, SessionEvent, SessionStatus,
    SessionUpdate, SpawnOutcome, ToolInvocation,
};
