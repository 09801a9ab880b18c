//! Terminal output value objects.
//!
//! An agent run produces a sequence of named output items. In verbose mode
//! the sequence carries the full per-iteration trace; in default mode it
//! carries the session identifiers plus the final answer and accumulated
//! additional info.

use serde::{Deserialize, Serialize};

/// Well-known output item names.
pub const SESSION_ID_FIELD: &str = "session_id";
pub const PARENT_INTERACTION_ID_FIELD: &str = "parent_interaction_id";
pub const RESPONSE_FIELD: &str = "response";
pub const ADDITIONAL_INFO_FIELD: &str = "additional_info";

/// The payload of a single output item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutputData {
    Text(String),
    Structured(serde_json::Value),
}

/// A single named output item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputItem {
    pub name: String,
    pub data: OutputData,
}

impl OutputItem {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: OutputData::Text(value.into()),
        }
    }

    pub fn structured(name: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            data: OutputData::Structured(value),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match &self.data {
            OutputData::Text(s) => Some(s),
            OutputData::Structured(_) => None,
        }
    }

    pub fn as_structured(&self) -> Option<&serde_json::Value> {
        match &self.data {
            OutputData::Text(_) => None,
            OutputData::Structured(v) => Some(v),
        }
    }
}

/// The terminal result of an agent run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentOutput {
    pub items: Vec<OutputItem>,
}

impl AgentOutput {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    pub fn push(&mut self, item: OutputItem) {
        self.items.push(item);
    }

    /// The final answer text, from the last `response` item.
    pub fn final_answer(&self) -> Option<&str> {
        self.items
            .iter()
            .rev()
            .find(|item| item.name == RESPONSE_FIELD)
            .and_then(|item| match &item.data {
                OutputData::Text(s) => Some(s.as_str()),
                OutputData::Structured(v) => v.get(RESPONSE_FIELD).and_then(|r| r.as_str()),
            })
    }
}
