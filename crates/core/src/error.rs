//! Error types for the Tidechat domain.
//!
//! Uses `thiserror` for ergonomic error definitions. Each bounded context has
//! its own error enum; the top-level `Error` is what crosses the session
//! boundary and carries a stable machine-readable `kind()` for the wire.

use thiserror::Error;

/// The top-level error type for all Tidechat operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Request validation ---
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    // --- Unknown conversation id ---
    #[error("Conversation not found: {0}")]
    NotFound(String),

    // --- Generation already in flight for the session ---
    #[error("A generation is already in flight for this session")]
    Busy,

    // --- Model capability errors ---
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    // --- Storage errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Machine-readable error kind, stable across releases.
    ///
    /// This is the `kind` field of the `error` event relayed to clients.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::Busy => "busy",
            Self::Model(_) => "model_failure",
            Self::Store(_) => "store_failure",
            Self::Serialization(_) => "serialization_error",
            Self::Internal(_) => "internal_error",
        }
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Rejected input. Nothing is mutated when one of these is returned.
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("Message content is empty")]
    EmptyMessage,

    #[error("Both user_prompt and assistant_response are required")]
    EmptyFewShotField,

    #[error("Duplicate few-shot user prompt: {user_prompt:?}")]
    DuplicateFewShot { user_prompt: String },

    #[error("Unsupported file type: .{extension}")]
    UnsupportedFileType { extension: String },

    #[error("File too large: {size_bytes} bytes (limit: {limit_bytes})")]
    FileTooLarge { size_bytes: u64, limit_bytes: u64 },

    #[error("File is not valid UTF-8 text")]
    InvalidEncoding,

    #[error(
        "Few-shot examples alone ({few_shot_tokens} tokens) exceed the context budget ({budget})"
    )]
    FewShotOverflow { few_shot_tokens: usize, budget: usize },

    #[error("Newest turn ({needed} tokens) does not fit the context budget ({budget})")]
    ContextOverflow { needed: usize, budget: usize },
}

#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by model endpoint, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("No fragment received within {0}s")]
    Timeout(u64),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Model endpoint not configured: {0}")]
    NotConfigured(String),

    #[error("Empty response from model")]
    EmptyResponse,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}
