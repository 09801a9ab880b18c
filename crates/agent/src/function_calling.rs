//! Function-calling adapters — per-provider multi-turn tool-use plumbing.
//!
//! An adapter knows two things about its provider: how to declare the
//! available tools in the provider's native schema, and how to render
//! executed tool results into the message shape the provider expects when
//! a tool conversation continues. Selecting no adapter means the loop uses
//! the generic JSON-in-text dialect exclusively, with the plain
//! tool-response interaction template.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use windlass_core::tool::ToolSpec;

use crate::invoker::Observation;
use crate::parser::PathConfig;

/// Interface identifiers accepted by the factory.
pub const OPENAI_INTERFACE: &str = "openai/v1/chat/completions";
pub const CONVERSE_INTERFACE: &str = "bedrock/converse/claude";
pub const TEXT_EMBEDDED_INTERFACE: &str = "bedrock/converse/deepseek_r1";

/// Parameter key the tool declarations are injected under.
pub const TOOL_CONFIGS: &str = "tool_configs";

/// A per-provider function-calling strategy.
pub trait FunctionCalling: Send + Sync {
    /// The interface identifier this adapter serves.
    fn interface(&self) -> &str;

    /// Where the parser should look inside this provider's responses.
    fn path_config(&self) -> PathConfig;

    /// Declare the available tools in the provider's native schema and
    /// inject any other provider-specific request parameters.
    fn configure(&self, tools: &[ToolSpec], params: &mut HashMap<String, String>);

    /// Render executed tool results into the provider's message shape,
    /// one serialized message per observation.
    fn supply(&self, observations: &[Observation]) -> Vec<String>;
}

/// Chat-completions style function calling: tools declared as `function`
/// entries, results returned as `tool` role messages.
pub struct OpenAiFunctionCalling;

impl FunctionCalling for OpenAiFunctionCalling {
    fn interface(&self) -> &str {
        OPENAI_INTERFACE
    }

    fn path_config(&self) -> PathConfig {
        PathConfig::openai()
    }

    fn configure(&self, tools: &[ToolSpec], params: &mut HashMap<String, String>) {
        let declarations: Vec<serde_json::Value> = tools
            .iter()
            .map(|spec| {
                json!({
                    "type": "function",
                    "function": {
                        "name": spec.tool_name(),
                        "description": spec.description.clone().unwrap_or_default(),
                        "parameters": {"type": "object", "properties": {}}
                    }
                })
            })
            .collect();
        params.insert(TOOL_CONFIGS.to_string(), json!(declarations).to_string());
        params
            .entry("tool_choice".to_string())
            .or_insert_with(|| "auto".to_string());
    }

    fn supply(&self, observations: &[Observation]) -> Vec<String> {
        observations
            .iter()
            .map(|o| {
                json!({
                    "role": "tool",
                    "tool_call_id": o.tool_call_id,
                    "content": o.content
                })
                .to_string()
            })
            .collect()
    }
}

/// Converse style function calling: tools declared as `toolSpec` entries,
/// results returned as `toolResult` content blocks in a user message.
pub struct ConverseFunctionCalling;

impl FunctionCalling for ConverseFunctionCalling {
    fn interface(&self) -> &str {
        CONVERSE_INTERFACE
    }

    fn path_config(&self) -> PathConfig {
        PathConfig::converse()
    }

    fn configure(&self, tools: &[ToolSpec], params: &mut HashMap<String, String>) {
        let declarations: Vec<serde_json::Value> = tools
            .iter()
            .map(|spec| {
                json!({
                    "toolSpec": {
                        "name": spec.tool_name(),
                        "description": spec.description.clone().unwrap_or_default(),
                        "inputSchema": {"json": {"type": "object", "properties": {}}}
                    }
                })
            })
            .collect();
        params.insert(TOOL_CONFIGS.to_string(), json!(declarations).to_string());
    }

    fn supply(&self, observations: &[Observation]) -> Vec<String> {
        observations
            .iter()
            .map(|o| {
                json!({
                    "role": "user",
                    "content": [{
                        "toolResult": {
                            "toolUseId": o.tool_call_id,
                            "content": [{"text": o.content}],
                            "status": if o.success { "success" } else { "error" }
                        }
                    }]
                })
                .to_string()
            })
            .collect()
    }
}

/// Text-embedded function calling for models without a native tool-call
/// channel: tools declared as a JSON list, results returned as plain JSON
/// text.
pub struct TextEmbeddedFunctionCalling;

impl FunctionCalling for TextEmbeddedFunctionCalling {
    fn interface(&self) -> &str {
        TEXT_EMBEDDED_INTERFACE
    }

    fn path_config(&self) -> PathConfig {
        PathConfig::text_embedded()
    }

    fn configure(&self, tools: &[ToolSpec], params: &mut HashMap<String, String>) {
        let declarations: Vec<serde_json::Value> = tools
            .iter()
            .map(|spec| {
                json!({
                    "tool_name": spec.tool_name(),
                    "description": spec.description.clone().unwrap_or_default()
                })
            })
            .collect();
        params.insert(TOOL_CONFIGS.to_string(), json!(declarations).to_string());
    }

    fn supply(&self, observations: &[Observation]) -> Vec<String> {
        observations
            .iter()
            .map(|o| {
                json!({
                    "tool_call_id": o.tool_call_id,
                    "tool_result": o.content
                })
                .to_string()
            })
            .collect()
    }
}

/// Resolves an adapter from the `_llm_interface` parameter. Unknown or
/// absent interfaces mean plain-text tool conventions.
pub struct FunctionCallingFactory;

impl FunctionCallingFactory {
    pub fn create(interface: Option<&str>) -> Option<Arc<dyn FunctionCalling>> {
        match interface? {
            OPENAI_INTERFACE => Some(Arc::new(OpenAiFunctionCalling)),
            CONVERSE_INTERFACE => Some(Arc::new(ConverseFunctionCalling)),
            TEXT_EMBEDDED_INTERFACE => Some(Arc::new(TextEmbeddedFunctionCalling)),
            _ => None,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────
