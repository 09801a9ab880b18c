//! Shared test helpers for loop tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use windlass_core::error::{ModelError, ToolError};
use windlass_core::model::{ModelChannel, ModelRequest, ModelResponse};
use windlass_core::tool::{Tool, ToolFactory, ToolSpec};

/// A mock channel that returns a sequence of scripted responses.
///
/// Each call to `invoke` returns the next result in the queue and records
/// the request. Panics if more calls are made than responses provided.
pub struct SequentialMockChannel {
    responses: Vec<Result<ModelResponse, ModelError>>,
    cursor: Mutex<usize>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl SequentialMockChannel {
    pub fn new(responses: Vec<ModelResponse>) -> Self {
        Self::with_results(responses.into_iter().map(Ok).collect())
    }

    pub fn with_results(responses: Vec<Result<ModelResponse, ModelError>>) -> Self {
        Self {
            responses,
            cursor: Mutex::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelChannel for SequentialMockChannel {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn invoke(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
        self.requests.lock().unwrap().push(request);
        let mut cursor = self.cursor.lock().unwrap();
        if *cursor >= self.responses.len() {
            panic!(
                "SequentialMockChannel: no more responses (call #{}, have {})",
                *cursor,
                self.responses.len()
            );
        }
        let response = self.responses[*cursor].clone();
        *cursor += 1;
        response
    }
}

/// What a [`ScriptedTool`] does when invoked.
#[derive(Clone)]
pub enum ToolBehavior {
    Succeed(String),
    Fail(String),
    Reject,
}

/// A tool with scripted behavior, recording invocations and closes
/// through shared handles so tests keep visibility after the factory
/// clones it.
#[derive(Clone)]
pub struct ScriptedTool {
    pub name: String,
    pub behavior: ToolBehavior,
    pub calls: Arc<Mutex<Vec<HashMap<String, String>>>>,
    pub closes: Arc<AtomicUsize>,
}

impl ScriptedTool {
    fn new(name: &str, behavior: ToolBehavior) -> Self {
        Self {
            name: name.to_string(),
            behavior,
            calls: Arc::new(Mutex::new(Vec::new())),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn succeeding(name: &str, output: &str) -> Self {
        Self::new(name, ToolBehavior::Succeed(output.to_string()))
    }

    pub fn failing(name: &str, reason: &str) -> Self {
        Self::new(name, ToolBehavior::Fail(reason.to_string()))
    }

    pub fn rejecting(name: &str) -> Self {
        Self::new(name, ToolBehavior::Reject)
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn last_params(&self) -> Option<HashMap<String, String>> {
        self.calls.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Tool for ScriptedTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> Option<&str> {
        Some("A scripted test tool")
    }

    fn validate(&self, _parameters: &HashMap<String, String>) -> bool {
        !matches!(self.behavior, ToolBehavior::Reject)
    }

    async fn run(&self, parameters: HashMap<String, String>) -> Result<String, ToolError> {
        self.calls.lock().unwrap().push(parameters);
        match &self.behavior {
            ToolBehavior::Succeed(output) => Ok(output.clone()),
            ToolBehavior::Fail(reason) => Err(ToolError::ExecutionFailed {
                tool_name: self.name.clone(),
                reason: reason.clone(),
            }),
            ToolBehavior::Reject => Ok(String::new()),
        }
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Creates clones of a prototype [`ScriptedTool`], renamed per spec. The
/// clones share the prototype's call/close counters.
pub struct ScriptedToolFactory {
    prototype: ScriptedTool,
}

impl ScriptedToolFactory {
    pub fn new(prototype: ScriptedTool) -> Self {
        Self { prototype }
    }
}

impl ToolFactory for ScriptedToolFactory {
    fn create(&self, spec: &ToolSpec) -> Result<Box<dyn Tool>, ToolError> {
        let mut tool = self.prototype.clone();
        tool.name = spec.tool_name().to_string();
        Ok(Box::new(tool))
    }
}

// ── Response builders ─────────────────────────────────────────────────────

pub fn generic_action_response(thought: &str, action: &str, input: &str) -> ModelResponse {
    ModelResponse::from_text(
        serde_json::json!({
            "thought": thought,
            "action": action,
            "action_input": input
        })
        .to_string(),
    )
}

pub fn generic_final_response(thought: &str, answer: &str) -> ModelResponse {
    ModelResponse::from_text(
        serde_json::json!({
            "thought": thought,
            "final_answer": answer
        })
        .to_string(),
    )
}

pub fn openai_tool_response(thought: &str, tool: &str, arguments: &str, id: &str) -> ModelResponse {
    ModelResponse::new(serde_json::json!({
        "choices": [{
            "message": {
                "content": thought,
                "tool_calls": [{
                    "function": {"name": tool, "arguments": arguments},
                    "id": id
                }]
            },
            "finish_reason": "tool_calls"
        }]
    }))
}

pub fn openai_text_response(text: &str) -> ModelResponse {
    ModelResponse::new(serde_json::json!({
        "choices": [{
            "message": {"content": text},
            "finish_reason": "stop"
        }]
    }))
}
