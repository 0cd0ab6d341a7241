//! specdraft core library
//!
//! Coordinates two stateful agent sessions that draft a specification together:
//! - `agent`: session lifecycle over an external streaming agent service
//! - `routing`: marker-based splitting and annotation stripping of agent text
//! - `orchestrator`: the collaboration state machine the caller talks to

pub mod agent;
pub mod config;
pub mod constants;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod paths;
pub mod routing;

#[cfg(test)]
pub(crate) mod testing;

pub use agent::{AgentRole, AgentService, AgentSession, ClaudeCliService};
pub use config::OrchestratorConfig;
pub use error::{ConfigError, OrchestratorError, ServiceError, SessionError};
pub use models::{ModelInfo, ModelRegistry};
pub use orchestrator::{Inbound, Orchestrator, OrchestratorEvent};
