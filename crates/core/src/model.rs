//! ModelClient trait — the abstraction over the hosted model endpoint.
//!
//! The engine consumes the model through a single capability: submit an
//! assembled prompt context, receive a lazy sequence of text fragments.
//! The sequence is finite, not restartable, and may fail mid-stream.

use crate::error::ModelError;
use crate::message::Role;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One role-tagged piece of an assembled prompt context.
///
/// Like a [`crate::message::Turn`] but without identity or timestamp —
/// few-shot examples expand into synthetic segments that were never turns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub role: Role,
    pub content: String,
}

impl Segment {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A generation request: the full ordered context plus sampling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// The assembled prompt context, newest user segment last.
    pub segments: Vec<Segment>,

    /// Maximum tokens the model may generate for the reply.
    pub max_tokens: u32,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_temperature() -> f32 {
    0.7
}

/// One incremental piece of model output delivered during streaming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fragment {
    /// Partial content delta. `None` on pure end-of-stream markers.
    #[serde(default)]
    pub content: Option<String>,

    /// Whether this is the final fragment of the stream.
    #[serde(default)]
    pub done: bool,
}

impl Fragment {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            done: false,
        }
    }

    pub fn done() -> Self {
        Self {
            content: None,
            done: true,
        }
    }
}

/// The model capability trait.
///
/// The session manager calls `generate()` without knowing which endpoint is
/// behind it — hosted chat-completions API, local stub, or a scripted test
/// double.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// A human-readable name for this client (e.g., "openai_compat").
    fn name(&self) -> &str;

    /// Submit a prompt context and receive a lazy stream of fragments.
    async fn generate(
        &self,
        request: GenerateRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<Fragment, ModelError>>,
        ModelError,
    >;

    /// Submit a prompt context and collect the complete response text.
    ///
    /// Default implementation drains `generate()`. Used by the ingestion
    /// pipeline, which has no use for incremental delivery.
    async fn complete(&self, request: GenerateRequest) -> std::result::Result<String, ModelError> {
        let mut rx = self.generate(request).await?;
        let mut out = String::new();
        while let Some(fragment) = rx.recv().await {
            let fragment = fragment?;
            if let Some(content) = fragment.content {
                out.push_str(&content);
            }
            if fragment.done {
                break;
            }
        }
        if out.is_empty() {
            return Err(ModelError::EmptyResponse);
        }
        Ok(out)
    }
}
