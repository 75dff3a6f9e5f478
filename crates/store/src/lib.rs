//! Conversation storage backends.
//!
//! Two implementations of [`tidechat_core::ConversationStore`]:
//! - [`SqliteStore`] — durable, with FTS5 full-text search
//! - [`InMemoryStore`] — ephemeral, for tests and throwaway sessions
//!
//! Both uphold the same contract: per-conversation mutations are atomic,
//! and `total_tokens` is recomputed from content on every mutation.

pub mod in_memory;
pub mod sqlite;

pub use in_memory::InMemoryStore;
pub use sqlite::SqliteStore;
