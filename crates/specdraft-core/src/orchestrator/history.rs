//! Conversation history and the one-time context preamble for Review

use chrono::{DateTime, Local, Utc};
use serde::Serialize;

const PREAMBLE_OPEN: &str = "=== PREVIOUS CONVERSATION CONTEXT ===\n\n\
This is the conversation that occurred before your first involvement:\n\n";
const PREAMBLE_CLOSE: &str = "=== END OF CONVERSATION CONTEXT ===\n\n\
Now, please address the following request with full awareness of the above context:\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryRole {
    User,
    Discovery,
}

impl HistoryRole {
    fn label(&self) -> &'static str {
        match self {
            HistoryRole::User => "USER",
            HistoryRole::Discovery => "DISCOVERY AI",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub role: HistoryRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Append-only log of the user/Discovery conversation
#[derive(Debug, Default)]
pub struct ConversationHistory {
    entries: Vec<HistoryEntry>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, role: HistoryRole, content: impl Into<String>) {
        self.entries.push(HistoryEntry {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Role-labelled, timestamped transcript wrapped in context delimiters
    pub fn preamble(&self) -> String {
        let mut out = String::from(PREAMBLE_OPEN);
        for entry in &self.entries {
            let time = entry.timestamp.with_timezone(&Local).format("%H:%M:%S");
            out.push_str(&format!(
                "[{}] {}:\n{}\n\n",
                time,
                entry.role.label(),
                entry.content
            ));
        }
        out.push_str(PREAMBLE_CLOSE);
        out
    }
}
