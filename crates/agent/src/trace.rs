//! Scratchpad, trace recording, and additional-info accumulation.
//!
//! The scratchpad is the growing transcript of tool observations appended
//! to the prompt across iterations. The trace is the persisted, ordered
//! record of every iteration's question/response, used for audit and chat
//! history reconstruction. Both are append-only for the lifetime of the
//! loop; entries are never mutated after being written.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};
use tracing::warn;
use windlass_core::memory::{ConversationMemory, InteractionRecord};

/// One recorded trace step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceStep {
    /// Who produced the response: "LLM" or a tool name.
    pub origin: String,
    /// The input side (the question, or the tool input).
    pub question: String,
    /// The output side (the decision text, or the observation).
    pub response: String,
    /// Strictly increasing position within the run.
    pub number: u32,
}

/// The growing transcript of tool-response paragraphs substituted into the
/// prompt each iteration.
#[derive(Debug, Clone, Default)]
pub struct Scratchpad {
    entries: Vec<String>,
}

impl Scratchpad {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a tool-response paragraph. Entries are never rewritten.
    pub fn push(&mut self, paragraph: impl Into<String>) {
        self.entries.push(paragraph.into());
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Render the transcript for prompt substitution. Stable for an
    /// unchanged entry list.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(entry);
            out.push_str("\n\n");
        }
        out
    }
}

/// Records trace steps with an atomic, strictly increasing trace number
/// and optionally persists each step as a child interaction.
///
/// Trace numbering uses atomic increments: the host may dispatch tool
/// completions on a different execution context, and adjacent iterations
/// write to the same counter.
pub struct TraceRecorder {
    memory: Option<Arc<dyn ConversationMemory>>,
    session_id: String,
    parent_interaction_id: Option<String>,
    enabled: bool,
    counter: AtomicU32,
    steps: std::sync::Mutex<Vec<TraceStep>>,
}

impl TraceRecorder {
    pub fn new(
        memory: Option<Arc<dyn ConversationMemory>>,
        session_id: impl Into<String>,
        parent_interaction_id: Option<String>,
        enabled: bool,
    ) -> Self {
        Self {
            memory,
            session_id: session_id.into(),
            parent_interaction_id,
            enabled,
            counter: AtomicU32::new(0),
            steps: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Record one trace step. Persistence is best-effort: a failed trace
    /// save is logged and the loop continues.
    pub async fn record(&self, origin: &str, question: &str, response: &str) -> u32 {
        let number = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.steps
            .lock()
            .expect("trace steps lock poisoned")
            .push(TraceStep {
                origin: origin.to_string(),
                question: question.to_string(),
                response: response.to_string(),
                number,
            });

        if !self.enabled {
            return number;
        }
        let Some(memory) = &self.memory else {
            return number;
        };
        let record = InteractionRecord::new(question, response)
            .with_origin(origin)
            .with_trace_number(number);
        if let Err(e) = memory
            .append_interaction(
                &self.session_id,
                self.parent_interaction_id.as_deref(),
                record,
            )
            .await
        {
            warn!(origin, error = %e, "Failed to persist trace step");
        }
        number
    }

    /// How many steps have been recorded so far.
    pub fn record_count(&self) -> u32 {
        self.counter.load(Ordering::SeqCst)
    }

    /// Snapshot of all recorded steps, in order.
    pub fn steps(&self) -> Vec<TraceStep> {
        self.steps
            .lock()
            .expect("trace steps lock poisoned")
            .clone()
    }
}

/// Accumulating map from `<tool-name>.output` to the stringified outputs
/// of tools flagged with `include_output_in_agent_response`. Grows
/// monotonically across iterations and is merged into the final answer
/// payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdditionalInfo {
    entries: BTreeMap<String, Vec<String>>,
}

impl AdditionalInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one output under `<tool-name>.output`.
    pub fn record(&mut self, tool_name: &str, output: impl Into<String>) {
        self.entries
            .entry(format!("{tool_name}.output"))
            .or_default()
            .push(output.into());
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.entries.get(key).map(|v| v.as_slice())
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(&self.entries).unwrap_or_else(|_| serde_json::json!({}))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────
