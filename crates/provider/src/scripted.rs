//! A scripted model client for tests.
//!
//! Replays configured fragment sequences, one script per `generate()` call.
//! Exported from the crate (not behind `#[cfg(test)]`) so downstream crates
//! can drive their integration tests with it.

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;
use tidechat_core::error::ModelError;
use tidechat_core::model::{Fragment, GenerateRequest, ModelClient};

/// One scripted generation: fragments to emit, then an optional failure.
#[derive(Debug, Clone)]
pub struct Script {
    pub fragments: Vec<String>,
    /// Error to emit after the fragments instead of a done marker.
    pub failure: Option<ModelError>,
    /// Delay before each fragment (lets tests exercise cancellation).
    pub fragment_delay: Duration,
}

impl Script {
    /// A script that streams `text` split into word fragments, then finishes.
    pub fn text(text: &str) -> Self {
        let mut fragments: Vec<String> =
            text.split_inclusive(' ').map(String::from).collect();
        if fragments.is_empty() {
            fragments.push(text.to_string());
        }
        Self {
            fragments,
            failure: None,
            fragment_delay: Duration::ZERO,
        }
    }

    /// A script that emits `fragments` then fails with `error`.
    pub fn failing_after(fragments: Vec<&str>, error: ModelError) -> Self {
        Self {
            fragments: fragments.into_iter().map(String::from).collect(),
            failure: Some(error),
            fragment_delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.fragment_delay = delay;
        self
    }
}

/// A model client that replays a queue of scripts.
///
/// Each call to `generate()` consumes the next script. Calls past the end of
/// the queue return `ModelError::EmptyResponse`.
pub struct ScriptedClient {
    scripts: Mutex<Vec<Script>>,
    calls: Mutex<usize>,
}

impl ScriptedClient {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts),
            calls: Mutex::new(0),
        }
    }

    /// A client that answers every request with the same text.
    pub fn repeating(text: &str, times: usize) -> Self {
        Self::new(vec![Script::text(text); times])
    }

    /// Number of `generate()` calls made so far.
    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl ModelClient for ScriptedClient {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(
        &self,
        _request: GenerateRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<Fragment, ModelError>>,
        ModelError,
    > {
        let script = {
            let mut calls = self.calls.lock().unwrap();
            let scripts = self.scripts.lock().unwrap();
            let script = scripts.get(*calls).cloned();
            *calls += 1;
            script
        };

        let script = script.ok_or(ModelError::EmptyResponse)?;

        let (tx, rx) = tokio::sync::mpsc::channel(16);
        tokio::spawn(async move {
            for fragment in script.fragments {
                if !script.fragment_delay.is_zero() {
                    tokio::time::sleep(script.fragment_delay).await;
                }
                if tx.send(Ok(Fragment::text(fragment))).await.is_err() {
                    return; // receiver dropped
                }
            }
            match script.failure {
                Some(error) => {
                    let _ = tx.send(Err(error)).await;
                }
                None => {
                    let _ = tx.send(Ok(Fragment::done())).await;
                }
            }
        });

        Ok(rx)
    }
}
