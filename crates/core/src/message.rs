//! Turn, FewShotExample, and Conversation domain types.
//!
//! These are the core value objects that flow through the entire system:
//! a client submits a message → the session appends a user Turn → the model
//! streams a reply → the accumulated reply is appended as an assistant Turn.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a turn's author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The hosted model
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A single role-tagged message in a conversation's ordered history.
///
/// Immutable once appended; position is implicit in sequence order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// Who authored this turn
    pub role: Role,

    /// The text content
    pub content: String,

    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    /// Create a new user turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a new assistant turn.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A user/assistant pair injected ahead of history to steer model behavior.
///
/// Appended only, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FewShotExample {
    pub user_prompt: String,
    pub assistant_response: String,
}

impl FewShotExample {
    pub fn new(user_prompt: impl Into<String>, assistant_response: impl Into<String>) -> Self {
        Self {
            user_prompt: user_prompt.into(),
            assistant_response: assistant_response.into(),
        }
    }
}

/// A conversation: ordered turns, few-shot examples, and a token total.
///
/// Invariant: `total_tokens` always equals the measured cost of the few-shot
/// examples plus turns as currently stored. Stores recompute it on every
/// mutation — it is never allowed to drift.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique conversation ID
    pub id: ConversationId,

    /// Ordered history turns
    pub turns: Vec<Turn>,

    /// Few-shot examples, in insertion order
    #[serde(default)]
    pub few_shots: Vec<FewShotExample>,

    /// When this conversation was created
    pub created_at: DateTime<Utc>,

    /// When the last mutation happened
    pub updated_at: DateTime<Utc>,

    /// Measured token cost of examples + turns
    #[serde(default)]
    pub total_tokens: usize,
}

impl Conversation {
    /// Create a new empty conversation.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: ConversationId::new(),
            turns: Vec::new(),
            few_shots: Vec::new(),
            created_at: now,
            updated_at: now,
            total_tokens: 0,
        }
    }

    /// Append a turn. Token totals are the owning store's responsibility.
    pub fn push_turn(&mut self, turn: Turn) {
        self.updated_at = Utc::now();
        self.turns.push(turn);
    }

    /// Append a few-shot example without any duplicate checking.
    /// Callers must check [`Conversation::has_duplicate_prompt`] first.
    pub fn push_few_shot(&mut self, example: FewShotExample) {
        self.updated_at = Utc::now();
        self.few_shots.push(example);
    }

    /// Clear turns and examples, keeping identity and creation time.
    pub fn clear(&mut self) {
        self.turns.clear();
        self.few_shots.clear();
        self.total_tokens = 0;
        self.updated_at = Utc::now();
    }

    /// Whether `user_prompt` exactly matches any existing few-shot prompt
    /// **or** any existing user turn's content.
    ///
    /// The check deliberately spans the whole conversation, not just prior
    /// examples: a prompt the user already asked is as much a duplicate as a
    /// repeated example.
    pub fn has_duplicate_prompt(&self, user_prompt: &str) -> bool {
        self.few_shots.iter().any(|e| e.user_prompt == user_prompt)
            || self
                .turns
                .iter()
                .any(|t| t.role == Role::User && t.content == user_prompt)
    }

    /// The last turn, if any.
    pub fn last_turn(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Render the conversation as plain text for full-text search indexing.
    ///
    /// One `role: content` line per turn; examples render as two lines each.
    pub fn searchable_text(&self) -> String {
        let mut out = String::new();
        for e in &self.few_shots {
            out.push_str("user: ");
            out.push_str(&e.user_prompt);
            out.push('\n');
            out.push_str("assistant: ");
            out.push_str(&e.assistant_response);
            out.push('\n');
        }
        for t in &self.turns {
            out.push_str(t.role.as_str());
            out.push_str(": ");
            out.push_str(&t.content);
            out.push('\n');
        }
        out
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}
