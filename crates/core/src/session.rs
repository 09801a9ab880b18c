//! Session domain types.
//!
//! An [`AgentSession`] is the per-run state owned by exactly one loop
//! invocation: conversation identity, the interaction it answers, and the
//! dynamic template inputs (question, context, chat history). Static
//! configuration does not live here — it belongs to the typed config and
//! the agent definition.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Unique identifier for a conversation session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The state of one agent run. Never shared across concurrent sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSession {
    /// The conversation this run belongs to.
    pub session_id: SessionId,

    /// The interaction the final answer will be written back to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_interaction_id: Option<String>,

    /// Owning tenant, when the host is multi-tenant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,

    /// Dynamic template inputs only: question, context, few-shot examples,
    /// section wrapper overrides. Anything static belongs in typed config.
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

impl AgentSession {
    /// Create a session for a new conversation asking `question`.
    pub fn new(question: impl Into<String>) -> Self {
        let mut parameters = HashMap::new();
        parameters.insert("question".to_string(), question.into());
        Self {
            session_id: SessionId::new(),
            parent_interaction_id: None,
            tenant_id: None,
            parameters,
        }
    }

    /// Continue an existing conversation.
    pub fn with_session_id(mut self, id: SessionId) -> Self {
        self.session_id = id;
        self
    }

    pub fn with_parent_interaction(mut self, id: impl Into<String>) -> Self {
        self.parent_interaction_id = Some(id.into());
        self
    }

    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant.into());
        self
    }

    /// Add a dynamic template input.
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// The question this run answers, if set.
    pub fn question(&self) -> Option<&str> {
        self.parameters.get("question").map(|s| s.as_str())
    }
}
