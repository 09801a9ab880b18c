//! Tool invocation — parameter construction and failure normalization.
//!
//! Every outcome of a tool call (validation rejection, execution error,
//! success) is normalized into an [`Observation`] the loop folds back into
//! the scratchpad. A bad tool call never aborts the session; it consumes
//! one iteration and the model sees what went wrong.

use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, warn};
use windlass_core::tool::{Tool, ToolSpec};

use crate::prompt::{LLM_GENERATED_INPUT, substitute};

/// The parameter key a tool reads its input from.
pub const INPUT_FIELD: &str = "input";

/// The normalized outcome of one tool execution attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub tool_name: String,
    pub tool_call_id: String,
    pub content: String,
    pub success: bool,
}

impl Observation {
    fn failure(tool_name: &str, tool_call_id: &str, content: String) -> Self {
        Self {
            tool_name: tool_name.to_string(),
            tool_call_id: tool_call_id.to_string(),
            content,
            success: false,
        }
    }
}

/// Build the parameter map for one tool invocation.
///
/// Starts from the spec's static parameters, merges scalar fields of a
/// JSON-object `action_input`, records the raw model-generated input under
/// `llm_generated_input`, and resolves `input` from (in order of
/// precedence) the original question, the spec's input template, or the
/// raw model-generated input.
pub fn build_tool_params(
    spec: &ToolSpec,
    question: &str,
    action_input: Option<&str>,
) -> HashMap<String, String> {
    let mut params = spec.parameters.clone();

    let Some(action_input) = action_input else {
        return params;
    };

    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(action_input) {
        for (key, value) in map {
            let rendered = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
            params.insert(key, rendered);
        }
    }
    params.insert(LLM_GENERATED_INPUT.to_string(), action_input.to_string());

    let input = if spec.use_original_input {
        question.to_string()
    } else if let Some(template) = spec.input_template() {
        substitute(template, &params)
    } else {
        action_input.to_string()
    };
    params.insert(INPUT_FIELD.to_string(), input);

    params
}

/// Validate and execute a tool, normalizing every outcome into an
/// [`Observation`].
pub async fn invoke_tool(
    tool: &dyn Tool,
    tool_name: &str,
    tool_call_id: &str,
    action_input: &str,
    params: HashMap<String, String>,
) -> Observation {
    if !tool.validate(&params) {
        warn!(tool = tool_name, "Tool rejected its parameters");
        return Observation::failure(
            tool_name,
            tool_call_id,
            format!("Failed to run the tool {tool_name} due to wrong input {action_input}."),
        );
    }

    match tool.run(params).await {
        Ok(output) => {
            debug!(tool = tool_name, "Tool executed");
            Observation {
                tool_name: tool_name.to_string(),
                tool_call_id: tool_call_id.to_string(),
                content: output,
                success: true,
            }
        }
        Err(e) => {
            warn!(tool = tool_name, error = %e, "Tool execution failed");
            Observation::failure(
                tool_name,
                tool_call_id,
                format!("Failed to run the tool {tool_name} with the error message {e}."),
            )
        }
    }
}

/// The observation fed back when the model asks for a tool that does not
/// exist. The session continues; the model sees the refusal. The call id
/// is kept so providers that demand a result per tool call still get one.
pub fn unsupported_tool_observation(tool_name: &str, tool_call_id: &str) -> Observation {
    Observation::failure(
        tool_name,
        tool_call_id,
        format!("Failed to run the tool {tool_name} which is unsupported."),
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────
