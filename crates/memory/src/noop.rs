//! No-op backend — disables conversation persistence entirely.

use async_trait::async_trait;
use windlass_core::error::MemoryError;
use windlass_core::memory::{
    ConversationMemory, Interaction, InteractionRecord, InteractionUpdate,
};

/// A no-op store. Appends succeed with an empty ID and nothing is kept.
pub struct NoopConversationStore;

#[async_trait]
impl ConversationMemory for NoopConversationStore {
    fn name(&self) -> &str {
        "none"
    }

    async fn load_recent(
        &self,
        _session_id: &str,
        _limit: usize,
    ) -> Result<Vec<Interaction>, MemoryError> {
        Ok(Vec::new())
    }

    async fn append_interaction(
        &self,
        _session_id: &str,
        _parent_id: Option<&str>,
        _record: InteractionRecord,
    ) -> Result<String, MemoryError> {
        Ok(String::new())
    }

    async fn update_interaction(
        &self,
        _interaction_id: &str,
        _update: InteractionUpdate,
    ) -> Result<(), MemoryError> {
        Ok(())
    }
}
