//! Conversation memory — the persistence boundary for interactions.
//!
//! The loop stores the final answer and (optionally) every trace step
//! through this trait. Memory is optional: memory-less sessions skip
//! persistence silently. Trace steps are stored as child interactions of
//! the parent interaction they belong to; [`ConversationMemory::load_recent`]
//! returns only top-level exchanges.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MemoryError;

/// One stored question/response exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    /// Unique interaction ID.
    pub id: String,

    /// The session this interaction belongs to.
    pub session_id: String,

    /// Parent interaction when this is a trace step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    /// Who produced the response ("LLM", a tool name, a channel).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,

    /// The input side of the exchange.
    pub question: String,

    /// The output side. Empty while the run is still in flight.
    pub response: String,

    /// Position within the parent's trace, when this is a trace step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_number: Option<u32>,

    /// Whether the response is a final answer (vs. an intermediate step).
    #[serde(default)]
    pub final_answer: bool,

    /// Accumulated tool outputs attached on completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_info: Option<serde_json::Value>,

    pub created_at: DateTime<Utc>,
}

/// The fields a caller supplies when appending an interaction.
#[derive(Debug, Clone, Default)]
pub struct InteractionRecord {
    pub question: String,
    pub response: String,
    pub origin: Option<String>,
    pub trace_number: Option<u32>,
    pub final_answer: bool,
}

impl InteractionRecord {
    pub fn new(question: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            response: response.into(),
            origin: None,
            trace_number: None,
            final_answer: false,
        }
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn with_trace_number(mut self, number: u32) -> Self {
        self.trace_number = Some(number);
        self
    }

    pub fn as_final_answer(mut self) -> Self {
        self.final_answer = true;
        self
    }
}

/// A partial update applied to an existing interaction.
#[derive(Debug, Clone, Default)]
pub struct InteractionUpdate {
    pub response: Option<String>,
    pub additional_info: Option<serde_json::Value>,
}

impl InteractionUpdate {
    pub fn response(text: impl Into<String>) -> Self {
        Self {
            response: Some(text.into()),
            additional_info: None,
        }
    }

    pub fn with_additional_info(mut self, info: serde_json::Value) -> Self {
        self.additional_info = Some(info);
        self
    }
}

/// The conversation memory boundary.
///
/// Implementations: in-memory (tests, ephemeral sessions), noop
/// (memory-less sessions), or a host-provided persistent index.
#[async_trait]
pub trait ConversationMemory: Send + Sync {
    /// The backend name (e.g., "in_memory", "none").
    fn name(&self) -> &str;

    /// Load the most recent top-level interactions for a session, ordered
    /// oldest first. Trace steps are not returned.
    async fn load_recent(
        &self,
        session_id: &str,
        limit: usize,
    ) -> std::result::Result<Vec<Interaction>, MemoryError>;

    /// Append an interaction. `parent_id` links a trace step to the
    /// exchange it belongs to. Returns the new interaction's ID.
    async fn append_interaction(
        &self,
        session_id: &str,
        parent_id: Option<&str>,
        record: InteractionRecord,
    ) -> std::result::Result<String, MemoryError>;

    /// Update fields of an existing interaction.
    async fn update_interaction(
        &self,
        interaction_id: &str,
        update: InteractionUpdate,
    ) -> std::result::Result<(), MemoryError>;
}
