//! Model endpoint clients.
//!
//! [`OpenAiCompatClient`] speaks the `/chat/completions` wire format, which
//! covers OpenAI, OpenRouter, Ollama, vLLM, and most hosted endpoints.
//! [`ScriptedClient`] replays a canned fragment sequence for tests.

pub mod openai_compat;
pub mod scripted;

pub use openai_compat::OpenAiCompatClient;
pub use scripted::ScriptedClient;

use std::sync::Arc;
use tidechat_config::AppConfig;
use tidechat_core::error::{Error, ModelError};
use tidechat_core::model::ModelClient;

/// Build the model client described by the configuration.
///
/// Fails with `ModelError::NotConfigured` when no endpoint URL is set;
/// the gateway surfaces that to the user instead of limping along.
pub fn build_from_config(config: &AppConfig) -> Result<Arc<dyn ModelClient>, Error> {
    let api_url = config
        .api_url
        .clone()
        .ok_or_else(|| ModelError::NotConfigured("api_url is not set".into()))?;
    let api_key = config.api_key.clone().unwrap_or_default();

    Ok(Arc::new(OpenAiCompatClient::new(
        "openai_compat",
        api_url,
        api_key,
        config.model.clone(),
    )))
}
