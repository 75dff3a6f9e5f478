//! In-memory backend — useful for testing and ephemeral sessions.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tidechat_context::token;
use tidechat_core::error::{Error, Result, ValidationError};
use tidechat_core::message::{Conversation, ConversationId, FewShotExample, Turn};
use tidechat_core::store::{ConversationStore, ConversationSummary};
use tokio::sync::{Mutex, RwLock};

/// An in-memory store keyed by conversation id.
///
/// The outer map lock is held only to look up or insert entries; each
/// conversation carries its own mutex so a mutation on one conversation
/// never blocks another.
pub struct InMemoryStore {
    conversations: RwLock<HashMap<String, Arc<Mutex<Conversation>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            conversations: RwLock::new(HashMap::new()),
        }
    }

    async fn entry(&self, id: &ConversationId) -> Result<Arc<Mutex<Conversation>>> {
        let map = self.conversations.read().await;
        map.get(&id.0)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.0.clone()))
    }

    fn summarize(conv: &Conversation) -> ConversationSummary {
        ConversationSummary {
            id: conv.id.clone(),
            created_at: conv.created_at,
            updated_at: conv.updated_at,
            turn_count: conv.turns.len(),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn create(&self) -> Result<Conversation> {
        let conv = Conversation::new();
        let mut map = self.conversations.write().await;
        map.insert(conv.id.0.clone(), Arc::new(Mutex::new(conv.clone())));
        Ok(conv)
    }

    async fn get(&self, id: &ConversationId) -> Result<Conversation> {
        let entry = self.entry(id).await?;
        let conv = entry.lock().await;
        Ok(conv.clone())
    }

    async fn append_turn(&self, id: &ConversationId, turn: Turn) -> Result<usize> {
        let entry = self.entry(id).await?;
        let mut conv = entry.lock().await;
        conv.push_turn(turn);
        conv.total_tokens = token::measure_conversation(&conv);
        Ok(conv.total_tokens)
    }

    async fn append_few_shot(
        &self,
        id: &ConversationId,
        example: FewShotExample,
    ) -> Result<usize> {
        let entry = self.entry(id).await?;
        let mut conv = entry.lock().await;
        if conv.has_duplicate_prompt(&example.user_prompt) {
            return Err(ValidationError::DuplicateFewShot {
                user_prompt: example.user_prompt,
            }
            .into());
        }
        conv.push_few_shot(example);
        conv.total_tokens = token::measure_conversation(&conv);
        Ok(conv.total_tokens)
    }

    async fn reset(&self, id: &ConversationId) -> Result<()> {
        let entry = self.entry(id).await?;
        let mut conv = entry.lock().await;
        conv.clear();
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ConversationSummary>> {
        let map = self.conversations.read().await;
        let mut summaries = Vec::with_capacity(map.len());
        for entry in map.values() {
            let conv = entry.lock().await;
            summaries.push(Self::summarize(&conv));
        }
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(summaries)
    }

    async fn search(&self, query: &str) -> Result<Vec<ConversationSummary>> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(vec![]);
        }
        let map = self.conversations.read().await;
        let mut matches = Vec::new();
        for entry in map.values() {
            let conv = entry.lock().await;
            if conv.searchable_text().to_lowercase().contains(&needle) {
                matches.push(Self::summarize(&conv));
            }
        }
        matches.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(matches)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.conversations.read().await.len())
    }
}
