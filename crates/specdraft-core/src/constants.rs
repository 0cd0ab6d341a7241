//! Application-wide constants
//!
//! Centralized values for routing, timing, and prompt shaping.

/// Application name, used for directories and log files
pub const APP_NAME: &str = "specdraft";

/// Marker protocol between the two agents
pub mod markers {
    /// Token that hands the rest of a Discovery message to Review
    pub const REVIEW: &str = "@review:";

    /// How far back to look for sentence-ending punctuation before a marker
    pub const SENTENCE_LOOKBACK: usize = 10;
}

/// Timer configurations
pub mod timing {
    use std::time::Duration;

    /// Quiet period after the last chunk before "done typing" is signalled
    pub const TYPING_DEBOUNCE: Duration = Duration::from_millis(200);
    /// Delay between a reset and the Discovery restart
    pub const RESET_SETTLE: Duration = Duration::from_secs(2);
}

/// Prompt shaping for injected messages
pub mod prompts {
    /// Reasoning-intensity suffix on routed user messages
    pub const USER_SUFFIX: &str = "think hard";
    /// Reasoning-intensity suffix on review feedback sent to Discovery
    pub const FEEDBACK_SUFFIX: &str = "think harder";
    /// First prompt for Discovery when the caller supplies none
    pub const GREETING: &str = "Hello! I'm ready to help discover requirements for a new project. \
Please tell me what you'd like to build.";
}

/// Defaults for the CLI-backed agent service
pub mod claude {
    /// Binary looked up on PATH
    pub const BINARY: &str = "claude";
    /// Agentic turns allowed per request
    pub const MAX_TURNS: u32 = 10;
    /// Permission mode passed to every request
    pub const PERMISSION_MODE: &str = "bypassPermissions";
    /// Tools the agents may use inside their workspace
    pub const ALLOWED_TOOLS: &[&str] = &[
        "Read",
        "Write",
        "Edit",
        "MultiEdit",
        "Bash",
        "Grep",
        "Glob",
        "LS",
        "WebFetch",
        "WebSearch",
        "Task",
    ];
}
