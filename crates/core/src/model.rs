//! ModelChannel trait — the abstraction over the model invocation transport.
//!
//! A channel knows how to send a parameter map (containing the rendered
//! prompt plus provider options such as stop sequences and max tokens) to a
//! model and return the provider's structured response body verbatim. The
//! wire format behind `invoke` is opaque to the loop; the output parser
//! interprets the returned body. No retry/backoff contract is assumed at
//! this layer — a channel error is fatal to the session.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::ModelError;

/// A request to invoke a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRequest {
    /// The model to invoke (e.g., "anthropic/claude-sonnet-4", "gpt-4o").
    pub model_id: String,

    /// Rendered prompt and provider-specific options, as a flat string map.
    pub parameters: HashMap<String, String>,
}

impl ModelRequest {
    pub fn new(model_id: impl Into<String>, parameters: HashMap<String, String>) -> Self {
        Self {
            model_id: model_id.into(),
            parameters,
        }
    }

    /// The rendered prompt, if present.
    pub fn prompt(&self) -> Option<&str> {
        self.parameters.get("prompt").map(|s| s.as_str())
    }
}

/// The structured response body returned by a provider.
///
/// Shapes vary by provider (chat-completions choices, Converse output
/// blocks, bare `{"response": "..."}` wrappers); the output parser is
/// configured with where to look inside it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    pub body: serde_json::Value,
}

impl ModelResponse {
    pub fn new(body: serde_json::Value) -> Self {
        Self { body }
    }

    /// Wrap plain text in the common `{"response": "..."}` shape.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            body: serde_json::json!({ "response": text.into() }),
        }
    }
}

/// The model invocation channel.
///
/// Implementations own transport, authentication, and any retry policy.
/// The agent loop calls `invoke` without knowing which provider is behind
/// it — pure polymorphism.
#[async_trait]
pub trait ModelChannel: Send + Sync {
    /// A human-readable name for this channel (e.g., "remote", "mock").
    fn name(&self) -> &str;

    /// Send a request and get the provider's structured response.
    async fn invoke(&self, request: ModelRequest) -> std::result::Result<ModelResponse, ModelError>;
}
