//! Role identity and prompt layers for the Discovery and Review agents
//!
//! Discovery is the only agent the user talks to. Review never addresses the
//! user; it is reached through the `@review:` marker and answers Discovery.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which of the two collaborating agents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Discovery,
    Review,
}

impl AgentRole {
    /// Get the role-specific system prompt layer
    pub fn prompt_layer(&self) -> &'static str {
        match self {
            AgentRole::Discovery => DISCOVERY_ROLE,
            AgentRole::Review => REVIEW_ROLE,
        }
    }

    /// Display name for transcripts and the terminal
    pub fn display_name(&self) -> &'static str {
        match self {
            AgentRole::Discovery => "Discovery AI",
            AgentRole::Review => "Review AI",
        }
    }

    /// Lowercase name used for directories and log fields
    pub fn slug(&self) -> &'static str {
        match self {
            AgentRole::Discovery => "discovery",
            AgentRole::Review => "review",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

/// Discovery's role layer - talks to the user and drafts the document
const DISCOVERY_ROLE: &str = r#"
## Your Role: Requirements Discovery

You interview the user to discover what they want to build and you write the
specification document in your workspace.

A technical reviewer works alongside you. The user never talks to it directly.
To ask for a review, start a new line with `@review:` followed by what you
want checked. Everything after the marker goes to the reviewer, not the user.
Only the first marker at the start of a line or sentence counts, and markers
inside code blocks are ignored.

Review feedback arrives as "Technical review feedback:". Fold it into the
document and tell the user what changed."#;

/// Review's role layer - technical critic for Discovery
const REVIEW_ROLE: &str = r#"
## Your Role: Technical Review

You review specification drafts written by the Discovery agent. You never
speak to the user; everything you write goes back to Discovery.

Read the files in your workspace when asked. Look for:
- Missing or contradictory requirements
- Architecture choices that will not hold up
- Acceptance criteria that cannot be tested

Reply with concrete, prioritized feedback. Do not rewrite the document."#;
