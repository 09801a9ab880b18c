//! Configuration loading, validation, and management for Windlass.
//!
//! Loads configuration from a TOML file (default `windlass.toml`, override
//! via the `WINDLASS_CONFIG` environment variable) with serde defaults for
//! every field. Validates all settings at load time.
//!
//! This is the typed replacement for a string-keyed parameter bag: loop
//! bounds, history limits, and output modes are fields here, not map
//! entries. Only genuinely dynamic template inputs remain a string map on
//! the session.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::debug;
use windlass_core::agent::{AgentDefinition, LlmSpec};
use windlass_core::tool::ToolSpec;

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// The root configuration structure. Maps directly to `windlass.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Agent loop settings.
    #[serde(default)]
    pub agent: AgentSettings,

    /// Model binding.
    #[serde(default)]
    pub llm: LlmSettings,

    /// Conversation memory settings.
    #[serde(default)]
    pub memory: MemorySettings,

    /// Statically declared tools.
    #[serde(default)]
    pub tools: Vec<ToolSettings>,
}

/// Settings governing the reasoning loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Agent name used in diagnostics and memory titles.
    #[serde(default = "default_agent_name")]
    pub name: String,

    /// Upper bound on model invocations per run.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// How many past exchanges to preload into the prompt.
    #[serde(default = "default_history_limit")]
    pub message_history_limit: usize,

    /// Return the full reasoning trace instead of only the final answer.
    #[serde(default)]
    pub verbose: bool,

    /// Persist per-iteration trace steps to conversation memory.
    #[serde(default = "default_true")]
    pub trace_enabled: bool,

    /// Append the current date and time to the system prompt or prompt
    /// prefix before each run.
    #[serde(default)]
    pub inject_datetime: bool,

    /// chrono format string for the injected datetime.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datetime_format: Option<String>,
}

fn default_agent_name() -> String {
    "windlass".into()
}
fn default_max_iterations() -> u32 {
    10
}
fn default_history_limit() -> usize {
    10
}
fn default_true() -> bool {
    true
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
            max_iterations: default_max_iterations(),
            message_history_limit: default_history_limit(),
            verbose: false,
            trace_enabled: true,
            inject_datetime: false,
            datetime_format: None,
        }
    }
}

/// The model binding and its provider parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    /// The model to invoke.
    #[serde(default = "default_model")]
    pub model_id: String,

    /// Provider interface selector for function calling
    /// (e.g., "openai/v1/chat/completions"). Absent means the generic
    /// JSON-in-text dialect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,

    /// Provider parameters merged into every request.
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

fn default_model() -> String {
    "anthropic/claude-sonnet-4".into()
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            model_id: default_model(),
            interface: None,
            parameters: HashMap::new(),
        }
    }
}

/// Conversation memory settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySettings {
    /// Backend selector: "in_memory" or "none".
    #[serde(default = "default_memory_backend")]
    pub backend: String,
}

fn default_memory_backend() -> String {
    "in_memory".into()
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            backend: default_memory_backend(),
        }
    }
}

/// One `[[tools]]` table entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSettings {
    /// Factory type used to instantiate the tool.
    #[serde(rename = "type")]
    pub tool_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub parameters: HashMap<String, String>,

    /// Optional input template rendered from the model-generated input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_template: Option<String>,

    #[serde(default)]
    pub use_original_input: bool,

    #[serde(default)]
    pub include_output_in_agent_response: bool,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: AppConfig = toml::from_str(&text)?;
        config.validate()?;
        debug!(path = %path.as_ref().display(), "Loaded configuration");
        Ok(config)
    }

    /// Load from `WINDLASS_CONFIG` / `windlass.toml` when present,
    /// defaults otherwise.
    pub fn load_or_default() -> Result<Self, ConfigError> {
        let path =
            std::env::var("WINDLASS_CONFIG").unwrap_or_else(|_| "windlass.toml".to_string());
        if Path::new(&path).exists() {
            Self::load(path)
        } else {
            let config = Self::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Validate all settings. Called automatically by the loaders.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.max_iterations == 0 {
            return Err(ConfigError::Invalid {
                message: "agent.max_iterations must be at least 1".into(),
            });
        }
        if self.llm.model_id.is_empty() {
            return Err(ConfigError::Invalid {
                message: "llm.model_id must not be empty".into(),
            });
        }
        match self.memory.backend.as_str() {
            "in_memory" | "none" => {}
            other => {
                return Err(ConfigError::Invalid {
                    message: format!("unknown memory backend: {other}"),
                });
            }
        }
        for tool in &self.tools {
            if tool.tool_type.is_empty() {
                return Err(ConfigError::Invalid {
                    message: "tools entry missing type".into(),
                });
            }
        }
        Ok(())
    }

    /// Build the agent definition this configuration describes.
    pub fn agent_definition(&self) -> AgentDefinition {
        let mut llm = LlmSpec::new(&self.llm.model_id);
        for (key, value) in &self.llm.parameters {
            llm.parameters.insert(key.clone(), value.clone());
        }
        if let Some(interface) = &self.llm.interface {
            llm.parameters
                .insert("_llm_interface".to_string(), interface.clone());
        }

        let mut agent = AgentDefinition::new(&self.agent.name, llm);
        for tool in &self.tools {
            let mut spec = ToolSpec::new(&tool.tool_type)
                .with_use_original_input(tool.use_original_input)
                .with_include_output(tool.include_output_in_agent_response);
            if let Some(name) = &tool.name {
                spec = spec.with_name(name);
            }
            if let Some(description) = &tool.description {
                spec = spec.with_description(description);
            }
            if let Some(template) = &tool.input_template {
                spec = spec.with_input_template(template);
            }
            for (key, value) in &tool.parameters {
                spec = spec.with_parameter(key, value);
            }
            agent = agent.with_tool(spec);
        }
        agent
    }
}
