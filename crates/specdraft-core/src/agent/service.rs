//! External agent service contract
//!
//! A service accepts a prompt plus an optional resume token and yields an
//! ordered stream of discriminated messages (`system`, `assistant`, `user`,
//! `result`). Cancellation is requested through the token passed at call
//! time; a cancelled stream ends with `ServiceError::Cancelled`.

use std::path::PathBuf;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::ServiceError;

/// Stream of messages produced by one query
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<ServiceMessage, ServiceError>> + Send>>;

/// One request to the agent service
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub prompt: String,
    /// Continue this service-side session instead of starting a new one
    pub resume_token: Option<String>,
    pub system_prompt: Option<String>,
    pub model: String,
    /// Execution context for the agent's tools
    pub cwd: PathBuf,
}

/// Backend that runs agent conversations
#[async_trait]
pub trait AgentService: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &str;

    /// Start a query and return its message stream
    async fn query(
        &self,
        request: QueryRequest,
        cancel: CancellationToken,
    ) -> Result<MessageStream, ServiceError>;
}

/// A message streamed by the agent service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServiceMessage {
    System {
        subtype: String,
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        model: Option<String>,
        #[serde(default)]
        tools: Vec<String>,
    },
    Assistant {
        message: AssistantPayload,
    },
    User {
        #[serde(default)]
        message: serde_json::Value,
    },
    Result {
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        duration_ms: Option<u64>,
        #[serde(default)]
        total_cost_usd: Option<f64>,
        #[serde(default)]
        num_turns: Option<u32>,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(other)]
    Unknown,
}

impl ServiceMessage {
    /// `system/init` carrying the resume token
    pub fn init(session_id: &str, model: &str) -> Self {
        ServiceMessage::System {
            subtype: "init".to_string(),
            session_id: Some(session_id.to_string()),
            model: Some(model.to_string()),
            tools: Vec::new(),
        }
    }

    /// Assistant message from content parts
    pub fn assistant(parts: Vec<ContentPart>) -> Self {
        ServiceMessage::Assistant {
            message: AssistantPayload {
                content: AssistantContent::Parts(parts),
            },
        }
    }

    /// Successful terminal result
    pub fn success(result: &str) -> Self {
        ServiceMessage::Result {
            subtype: Some("success".to_string()),
            result: Some(result.to_string()),
            duration_ms: None,
            total_cost_usd: None,
            num_turns: None,
            is_error: false,
        }
    }

    /// Parse one stream-json line
    pub fn parse_line(line: &str) -> Result<Self, ServiceError> {
        serde_json::from_str(line).map_err(|e| ServiceError::Protocol(e.to_string()))
    }
}

/// The `message` object of an assistant message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantPayload {
    #[serde(default)]
    pub content: AssistantContent,
}

impl AssistantPayload {
    /// All text parts in order, joined with newlines; `None` if there are none
    pub fn text(&self) -> Option<String> {
        let texts: Vec<&str> = match &self.content {
            AssistantContent::Text(text) => vec![text.as_str()],
            AssistantContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect(),
        };
        if texts.is_empty() {
            None
        } else {
            Some(texts.join("\n"))
        }
    }

    /// Tool invocations in order
    pub fn tool_uses(&self) -> impl Iterator<Item = (&str, &str, &serde_json::Value)> {
        let parts: &[ContentPart] = match &self.content {
            AssistantContent::Parts(parts) => parts.as_slice(),
            AssistantContent::Text(_) => &[],
        };
        parts.iter().filter_map(|part| match part {
            ContentPart::ToolUse { id, name, input } => {
                Some((id.as_str(), name.as_str(), input))
            }
            _ => None,
        })
    }
}

/// Assistant content: a bare string or typed parts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AssistantContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl Default for AssistantContent {
    fn default() -> Self {
        AssistantContent::Parts(Vec::new())
    }
}

/// One part of assistant content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

impl ContentPart {
    pub fn text(text: &str) -> Self {
        ContentPart::Text {
            text: text.to_string(),
        }
    }

    pub fn tool_use(id: &str, name: &str, input: serde_json::Value) -> Self {
        ContentPart::ToolUse {
            id: id.to_string(),
            name: name.to_string(),
            input,
        }
    }
}
