//! In-memory backend — useful for testing and ephemeral sessions.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;
use windlass_core::error::MemoryError;
use windlass_core::memory::{
    ConversationMemory, Interaction, InteractionRecord, InteractionUpdate,
};

/// An in-memory store keeping interactions per session in insertion order.
pub struct InMemoryConversationStore {
    sessions: Arc<RwLock<HashMap<String, Vec<Interaction>>>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Total interactions stored across all sessions, trace steps included.
    pub async fn count(&self) -> usize {
        self.sessions.read().await.values().map(|v| v.len()).sum()
    }

    /// Fetch a single interaction by ID.
    pub async fn get(&self, interaction_id: &str) -> Option<Interaction> {
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .flat_map(|v| v.iter())
            .find(|i| i.id == interaction_id)
            .cloned()
    }

    /// Trace steps recorded under a parent interaction, in trace order.
    pub async fn traces(&self, parent_id: &str) -> Vec<Interaction> {
        let sessions = self.sessions.read().await;
        let mut traces: Vec<Interaction> = sessions
            .values()
            .flat_map(|v| v.iter())
            .filter(|i| i.parent_id.as_deref() == Some(parent_id))
            .cloned()
            .collect();
        traces.sort_by_key(|i| i.trace_number.unwrap_or(0));
        traces
    }
}

impl Default for InMemoryConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConversationMemory for InMemoryConversationStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn load_recent(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<Interaction>, MemoryError> {
        let sessions = self.sessions.read().await;
        let Some(interactions) = sessions.get(session_id) else {
            return Ok(Vec::new());
        };

        // Top-level exchanges only; trace steps stay internal.
        let top_level: Vec<Interaction> = interactions
            .iter()
            .filter(|i| i.parent_id.is_none())
            .cloned()
            .collect();

        let skip = top_level.len().saturating_sub(limit);
        Ok(top_level.into_iter().skip(skip).collect())
    }

    async fn append_interaction(
        &self,
        session_id: &str,
        parent_id: Option<&str>,
        record: InteractionRecord,
    ) -> Result<String, MemoryError> {
        let id = Uuid::new_v4().to_string();
        let interaction = Interaction {
            id: id.clone(),
            session_id: session_id.to_string(),
            parent_id: parent_id.map(|p| p.to_string()),
            origin: record.origin,
            question: record.question,
            response: record.response,
            trace_number: record.trace_number,
            final_answer: record.final_answer,
            additional_info: None,
            created_at: Utc::now(),
        };

        self.sessions
            .write()
            .await
            .entry(session_id.to_string())
            .or_default()
            .push(interaction);
        Ok(id)
    }

    async fn update_interaction(
        &self,
        interaction_id: &str,
        update: InteractionUpdate,
    ) -> Result<(), MemoryError> {
        let mut sessions = self.sessions.write().await;
        let interaction = sessions
            .values_mut()
            .flat_map(|v| v.iter_mut())
            .find(|i| i.id == interaction_id)
            .ok_or_else(|| MemoryError::NotFound(interaction_id.to_string()))?;

        if let Some(response) = update.response {
            interaction.response = response;
        }
        if let Some(info) = update.additional_info {
            interaction.additional_info = Some(info);
        }
        Ok(())
    }
}
