//! Orchestrator configuration
//!
//! Loaded from TOML. Lookup order: an explicit path, then `$SPECDRAFT_CONFIG`,
//! then `~/.specdraft/config.toml`, then built-in defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};

use crate::agent::AgentRole;
use crate::constants::{claude, prompts, timing};
use crate::error::ConfigError;
use crate::models::{ModelInfo, ModelRegistry};
use crate::paths;

/// Environment variable naming a config file
pub const CONFIG_ENV: &str = "SPECDRAFT_CONFIG";

/// Settings for the `claude` CLI agent service
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClaudeCliConfig {
    pub binary: String,
    pub max_turns: u32,
    pub permission_mode: String,
    pub allowed_tools: Vec<String>,
    /// Model the service falls back to when the selected one is overloaded
    pub fallback_model: Option<String>,
}

impl Default for ClaudeCliConfig {
    fn default() -> Self {
        Self {
            binary: claude::BINARY.to_string(),
            max_turns: claude::MAX_TURNS,
            permission_mode: claude::PERMISSION_MODE.to_string(),
            allowed_tools: claude::ALLOWED_TOOLS.iter().map(|t| t.to_string()).collect(),
            fallback_model: None,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Working directory for the Discovery agent
    pub discovery_workspace: Option<PathBuf>,
    /// Working directory for the Review agent
    pub review_workspace: Option<PathBuf>,
    /// Starting model id (registry default when unset)
    pub model: Option<String>,
    pub debounce_ms: u64,
    pub settle_delay_ms: u64,
    pub greeting: String,
    pub user_suffix: String,
    pub feedback_suffix: String,
    pub discovery_system_prompt: Option<String>,
    pub review_system_prompt: Option<String>,
    pub claude: ClaudeCliConfig,
    /// Extra registry entries
    pub models: Vec<ModelInfo>,
    /// Base for relative and default workspaces
    #[serde(skip)]
    pub root: Option<PathBuf>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            discovery_workspace: None,
            review_workspace: None,
            model: None,
            debounce_ms: timing::TYPING_DEBOUNCE.as_millis() as u64,
            settle_delay_ms: timing::RESET_SETTLE.as_millis() as u64,
            greeting: prompts::GREETING.to_string(),
            user_suffix: prompts::USER_SUFFIX.to_string(),
            feedback_suffix: prompts::FEEDBACK_SUFFIX.to_string(),
            discovery_system_prompt: None,
            review_system_prompt: None,
            claude: ClaudeCliConfig::default(),
            models: Vec::new(),
            root: None,
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration, falling back to defaults when no file exists
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_path(path);
        }
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Self::from_path(Path::new(&path));
        }
        let path = paths::config_file();
        if path.exists() {
            return Self::from_path(&path);
        }
        debug!("No config file at {}, using defaults", path.display());
        Ok(Self::default())
    }

    /// Load from a specific TOML file
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Builder: set the base directory for workspaces
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Resolved workspace directory for a role
    pub fn workspace_for(&self, role: AgentRole) -> PathBuf {
        let root = self
            .root
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        let configured = match role {
            AgentRole::Discovery => self.discovery_workspace.as_ref(),
            AgentRole::Review => self.review_workspace.as_ref(),
        };
        match configured {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => root.join(path),
            None => root.join("workspaces").join(role.slug()),
        }
    }

    /// System prompt for a role: the configured override or the built-in layer
    pub fn system_prompt_for(&self, role: AgentRole) -> String {
        let configured = match role {
            AgentRole::Discovery => self.discovery_system_prompt.as_ref(),
            AgentRole::Review => self.review_system_prompt.as_ref(),
        };
        configured
            .cloned()
            .unwrap_or_else(|| role.prompt_layer().to_string())
    }

    /// Built-in models plus the configured extras
    pub fn registry(&self) -> ModelRegistry {
        ModelRegistry::builtin().with_extra(self.models.clone())
    }
}
