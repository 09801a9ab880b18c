//! Tool contracts — specs, live instances, factories, and discovery.
//!
//! Tools are what let the agent act: query an index, call an API, run a
//! computation. Only the invocation contract lives here; implementations
//! are host concerns. The loop creates one live instance per declared tool
//! per session and releases every instance exactly once at session end.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::agent::AgentDefinition;
use crate::error::ToolError;

/// Attribute key holding a tool's input template. The template is
/// placeholder-substituted from the merged tool parameters, including the
/// last model-generated input.
pub const INPUT_ATTRIBUTE: &str = "input";

/// Declarative description of a tool bound to an agent. Immutable once
/// loaded for a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Factory type used to instantiate the tool.
    #[serde(rename = "type")]
    pub tool_type: String,

    /// Registered name. Defaults to the type when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Description shown to the model in the tool catalogue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Static configuration parameters merged into every invocation.
    #[serde(default)]
    pub parameters: HashMap<String, String>,

    /// Attribute map. `input` holds an optional input template.
    #[serde(default)]
    pub attributes: HashMap<String, String>,

    /// Pass the original user question as the tool input instead of the
    /// model-generated input.
    #[serde(default)]
    pub use_original_input: bool,

    /// Accumulate this tool's outputs into the final answer payload.
    #[serde(default)]
    pub include_output_in_agent_response: bool,
}

impl ToolSpec {
    pub fn new(tool_type: impl Into<String>) -> Self {
        Self {
            tool_type: tool_type.into(),
            name: None,
            description: None,
            parameters: HashMap::new(),
            attributes: HashMap::new(),
            use_original_input: false,
            include_output_in_agent_response: false,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_input_template(mut self, template: impl Into<String>) -> Self {
        self.attributes.insert(INPUT_ATTRIBUTE.into(), template.into());
        self
    }

    pub fn with_use_original_input(mut self, flag: bool) -> Self {
        self.use_original_input = flag;
        self
    }

    pub fn with_include_output(mut self, flag: bool) -> Self {
        self.include_output_in_agent_response = flag;
        self
    }

    /// The name this tool is registered under.
    pub fn tool_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.tool_type)
    }

    /// The configured input template, if any.
    pub fn input_template(&self) -> Option<&str> {
        self.attributes.get(INPUT_ATTRIBUTE).map(|s| s.as_str())
    }
}

/// A live, validated tool handle.
///
/// Created once per session per tool via a [`ToolFactory`]; destroyed at
/// session end through [`Tool::close`].
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool instance.
    fn name(&self) -> &str;

    /// Description of what this tool does (rendered into the prompt).
    fn description(&self) -> Option<&str>;

    /// Check parameters before execution. A `false` here becomes a
    /// synthesized failure observation, not an error.
    fn validate(&self, parameters: &HashMap<String, String>) -> bool;

    /// Execute the tool. The returned string is the raw observation.
    async fn run(
        &self,
        parameters: HashMap<String, String>,
    ) -> std::result::Result<String, ToolError>;

    /// Release held resources. Called exactly once at session end.
    async fn close(&self) {}
}

/// Creates live tool instances from specs.
pub trait ToolFactory: Send + Sync {
    fn create(&self, spec: &ToolSpec) -> std::result::Result<Box<dyn Tool>, ToolError>;
}

/// A registry of tool factories keyed by tool type.
///
/// The agent loop uses this to instantiate every tool an agent declares
/// before the first iteration runs.
pub struct ToolRegistry {
    factories: HashMap<String, Box<dyn ToolFactory>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a factory. Replaces any existing factory for the type.
    pub fn register(&mut self, tool_type: impl Into<String>, factory: Box<dyn ToolFactory>) {
        self.factories.insert(tool_type.into(), factory);
    }

    /// Instantiate a tool from its spec.
    pub fn create(&self, spec: &ToolSpec) -> std::result::Result<Box<dyn Tool>, ToolError> {
        let factory = self
            .factories
            .get(&spec.tool_type)
            .ok_or_else(|| ToolError::UnknownType(spec.tool_type.clone()))?;
        factory.create(spec)
    }

    /// List all registered tool types.
    pub fn types(&self) -> Vec<&str> {
        self.factories.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Dynamic tool discovery (e.g., remote tool catalogs).
///
/// Failure degrades gracefully to the statically configured tool set.
#[async_trait]
pub trait ToolCatalog: Send + Sync {
    async fn fetch_tools(
        &self,
        agent: &AgentDefinition,
    ) -> std::result::Result<Vec<ToolSpec>, ToolError>;
}
