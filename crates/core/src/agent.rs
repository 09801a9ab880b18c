//! Agent definition value objects.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::tool::ToolSpec;

/// A loaded agent: which model it talks to, which tools it may use, and
/// its default template parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefinition {
    /// Agent name (diagnostics and memory titles).
    pub name: String,

    /// The model binding.
    pub llm: LlmSpec,

    /// Statically declared tools.
    #[serde(default)]
    pub tools: Vec<ToolSpec>,

    /// Default template parameters, overridden by per-run session
    /// parameters.
    #[serde(default)]
    pub parameters: HashMap<String, String>,

    /// Owning tenant, when the host is multi-tenant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

impl AgentDefinition {
    pub fn new(name: impl Into<String>, llm: LlmSpec) -> Self {
        Self {
            name: name.into(),
            llm,
            tools: Vec::new(),
            parameters: HashMap::new(),
            tenant_id: None,
        }
    }

    pub fn with_tool(mut self, spec: ToolSpec) -> Self {
        self.tools.push(spec);
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant.into());
        self
    }
}

/// The model side of an agent definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSpec {
    /// The model to invoke.
    pub model_id: String,

    /// Provider parameters merged into every request (temperature, stop
    /// sequences, the `_llm_interface` selector, etc.).
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

impl LlmSpec {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            parameters: HashMap::new(),
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}
