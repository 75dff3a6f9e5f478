//! # Tidechat Core
//!
//! Domain types, traits, and error definitions for the Tidechat conversation
//! engine. This crate has **zero framework dependencies** — it defines the
//! domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! The two external capabilities the engine consumes — the hosted model and
//! conversation storage — are defined as traits here. Implementations live in
//! their respective crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with scripted/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod message;
pub mod model;
pub mod store;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ModelError, Result, StoreError, ValidationError};
pub use message::{Conversation, ConversationId, FewShotExample, Role, Turn};
pub use model::{Fragment, GenerateRequest, ModelClient, Segment};
pub use store::{ConversationStore, ConversationSummary};
