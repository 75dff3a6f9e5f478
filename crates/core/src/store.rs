//! ConversationStore trait — persistent conversation records.
//!
//! The engine consumes storage through a single capability: get/set/delete a
//! conversation record by id, plus listing and full-text search.
//!
//! Concurrency contract: per-id mutations are atomic (the backend guards each
//! conversation's read-modify-write), but the store does *not* serialize
//! generation — that is the Streaming Session Manager's lock.

use crate::error::Result;
use crate::message::{Conversation, ConversationId, FewShotExample, Turn};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A list/search entry: identity and ordering data only, newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: ConversationId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub turn_count: usize,
}

/// The core ConversationStore trait.
///
/// Implementations: SQLite (FTS5 search), in-memory (tests and ephemeral
/// runs). Every mutation recomputes the conversation's token total so the
/// stored figure never drifts from the measured cost.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// The backend name (e.g., "sqlite", "in_memory").
    fn name(&self) -> &str;

    /// Create a new empty conversation, durable before return.
    async fn create(&self) -> Result<Conversation>;

    /// Fetch a conversation by id. `Error::NotFound` on unknown ids.
    async fn get(&self, id: &ConversationId) -> Result<Conversation>;

    /// Append a turn and return the updated token total.
    async fn append_turn(&self, id: &ConversationId, turn: Turn) -> Result<usize>;

    /// Append a few-shot example and return the updated token total.
    ///
    /// Rejects with `ValidationError::DuplicateFewShot` when the example's
    /// user prompt exactly matches any existing user turn or example in the
    /// same conversation.
    async fn append_few_shot(&self, id: &ConversationId, example: FewShotExample)
    -> Result<usize>;

    /// Clear turns and examples; the id and creation time survive.
    async fn reset(&self, id: &ConversationId) -> Result<()>;

    /// All conversation summaries, newest first.
    async fn list(&self) -> Result<Vec<ConversationSummary>>;

    /// Summaries of conversations whose stored turn content matches `query`.
    async fn search(&self, query: &str) -> Result<Vec<ConversationSummary>>;

    /// Number of stored conversations.
    async fn count(&self) -> Result<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_serialization() {
        let summary = ConversationSummary {
            id: ConversationId::from("abc"),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            turn_count: 4,
        };
        let json = serde_json::to_string(&summary).unwrap();
        assert!(json.contains("abc"));
        assert!(json.contains(r#""turn_count":4"#));
    }
}
