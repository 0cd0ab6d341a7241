//! Model registry
//!
//! Known model selections and the in-band directive each one uses to switch a
//! running agent session.

use serde::{Deserialize, Serialize};

/// One selectable model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Identifier passed to the agent service (e.g., "opus")
    pub id: String,
    /// Human-readable name
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    /// Argument for the in-band `/model` directive, if the service has one
    #[serde(default)]
    pub control_command: Option<String>,
    #[serde(default)]
    pub is_default: bool,
    /// Configured outside this table; no switch directive exists for it
    #[serde(default)]
    pub is_custom: bool,
}

impl ModelInfo {
    /// Create model info with a control command equal to its id
    pub fn new(id: &str, display_name: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            description: description.to_string(),
            control_command: Some(id.to_string()),
            is_default: false,
            is_custom: false,
        }
    }

    /// Builder: mark as the registry default
    pub fn default_choice(mut self) -> Self {
        self.is_default = true;
        self
    }

    /// Builder: custom model without a switch directive
    pub fn custom(mut self) -> Self {
        self.control_command = None;
        self.is_custom = true;
        self
    }

    /// The directive that switches a live session to this model
    pub fn switch_directive(&self) -> Option<String> {
        self.control_command
            .as_deref()
            .map(|cmd| format!("/model {}", cmd))
    }
}

/// Lookup table of known models
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: Vec<ModelInfo>,
}

impl ModelRegistry {
    /// Registry holding the built-in models
    pub fn builtin() -> Self {
        Self {
            models: vec![
                ModelInfo::new(
                    "opus",
                    "Claude Opus",
                    "Most capable model for deep requirements work",
                )
                .default_choice(),
                ModelInfo::new("sonnet", "Claude Sonnet", "Balanced speed and depth"),
                ModelInfo::new("haiku", "Claude Haiku", "Fastest responses"),
                ModelInfo::new("custom", "Custom", "Model configured in the agent service").custom(),
            ],
        }
    }

    /// Append extra entries; an entry whose id already exists replaces it
    pub fn with_extra(mut self, extra: Vec<ModelInfo>) -> Self {
        for model in extra {
            if model.is_default {
                for existing in &mut self.models {
                    existing.is_default = false;
                }
            }
            match self.models.iter_mut().find(|m| m.id == model.id) {
                Some(existing) => *existing = model,
                None => self.models.push(model),
            }
        }
        self
    }

    /// The default model (first flagged entry, else the first entry)
    pub fn default_model(&self) -> Option<&ModelInfo> {
        self.models
            .iter()
            .find(|m| m.is_default)
            .or_else(|| self.models.first())
    }

    pub fn get_by_id(&self, id: &str) -> Option<&ModelInfo> {
        self.models.iter().find(|m| m.id == id)
    }

    pub fn get_by_command(&self, command: &str) -> Option<&ModelInfo> {
        self.models
            .iter()
            .find(|m| m.control_command.as_deref() == Some(command))
    }

    pub fn all(&self) -> &[ModelInfo] {
        &self.models
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
