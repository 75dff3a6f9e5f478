//! Streaming session management.
//!
//! The [`SessionManager`] is the concurrency heart of the system: it enforces
//! one in-flight generation per connected client, relays model fragments as
//! [`SessionEvent`]s, and guarantees that a cancelled or failed generation
//! never persists a partial assistant turn.
//!
//! The [`ingest`] module handles file uploads: validate, chunk, analyze each
//! chunk through the model, and persist the analyses into the conversation.

pub mod events;
pub mod ingest;
pub mod manager;

pub use events::SessionEvent;
pub use ingest::{IngestReport, IngestionPipeline};
pub use manager::{SessionConfig, SessionManager, SessionState};
