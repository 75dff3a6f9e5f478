//! The streaming session manager.
//!
//! One session per connected client. Each session admits at most one
//! generation at a time; a second `submit_message` while one is in flight is
//! rejected with `Error::Busy` rather than queued.
//!
//! Persistence rules around a generation:
//! - the user turn is appended before the model is called and survives
//!   whatever happens afterwards
//! - the assistant turn is appended only when the stream completes; a
//!   cancelled or failed stream persists nothing

use crate::events::SessionEvent;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tidechat_config::AppConfig;
use tidechat_context::assembler::PromptAssembler;
use tidechat_core::error::{Error, ModelError, Result, ValidationError};
use tidechat_core::message::{ConversationId, Turn};
use tidechat_core::model::{GenerateRequest, ModelClient};
use tidechat_core::store::ConversationStore;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tracing::{debug, info, warn};

/// How a session's last generation ended, or that one is running now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No generation has run yet, or the last one completed.
    Idle,
    /// A generation is in flight.
    Generating,
    /// The last generation was cancelled by the client.
    Cancelled,
    /// The last generation failed.
    Failed,
}

impl SessionState {
    /// Whether a new generation may start.
    pub fn ready(&self) -> bool {
        !matches!(self, Self::Generating)
    }
}

struct Session {
    state: Mutex<SessionState>,
    cancel: Mutex<Option<oneshot::Sender<()>>>,
}

impl Session {
    fn new() -> Self {
        Self {
            state: Mutex::new(SessionState::Idle),
            cancel: Mutex::new(None),
        }
    }
}

/// Generation settings threaded into every session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub max_context_tokens: usize,
    pub reply_tokens: usize,
    pub temperature: f32,
    /// Max wait for the next stream fragment before the generation is
    /// treated as failed.
    pub fragment_timeout: Duration,
}

impl SessionConfig {
    pub fn from_app(config: &AppConfig) -> Self {
        Self {
            max_context_tokens: config.context.max_tokens,
            reply_tokens: config.context.reply_tokens,
            temperature: config.temperature,
            fragment_timeout: Duration::from_secs(config.gateway.fragment_timeout_secs),
        }
    }
}

/// Manages per-client sessions and their generations.
pub struct SessionManager {
    store: Arc<dyn ConversationStore>,
    model: Arc<dyn ModelClient>,
    config: SessionConfig,
    assembler: PromptAssembler,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        model: Arc<dyn ModelClient>,
        config: SessionConfig,
    ) -> Self {
        let assembler = PromptAssembler::new(config.max_context_tokens, config.reply_tokens);
        Self {
            store,
            model,
            config,
            assembler,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Register a newly connected client.
    pub async fn connect(&self, client_id: &str) {
        let mut sessions = self.sessions.write().await;
        sessions.insert(client_id.to_string(), Arc::new(Session::new()));
        info!(client_id, "session connected");
    }

    /// Remove a client's session, cancelling any in-flight generation.
    pub async fn disconnect(&self, client_id: &str) {
        self.cancel(client_id).await;
        let mut sessions = self.sessions.write().await;
        sessions.remove(client_id);
        info!(client_id, "session disconnected");
    }

    /// Cancel the client's in-flight generation, if any.
    ///
    /// Returns true when a generation was actually signalled.
    pub async fn cancel(&self, client_id: &str) -> bool {
        let session = {
            let sessions = self.sessions.read().await;
            sessions.get(client_id).cloned()
        };
        let Some(session) = session else {
            return false;
        };
        let sender = session.cancel.lock().await.take();
        match sender {
            Some(tx) => {
                debug!(client_id, "cancelling in-flight generation");
                tx.send(()).is_ok()
            }
            None => false,
        }
    }

    /// Current state of a client's session.
    pub async fn state(&self, client_id: &str) -> Option<SessionState> {
        let sessions = self.sessions.read().await;
        match sessions.get(client_id) {
            Some(session) => Some(*session.state.lock().await),
            None => None,
        }
    }

    /// Number of connected sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Submit a user message and stream the reply as events.
    ///
    /// On success the call returns once the generation has started; fragments
    /// and the final outcome arrive on `events`. On failure nothing is
    /// streaming and the error describes why (the user turn is still
    /// persisted if the failure happened after validation).
    pub async fn submit_message(
        &self,
        client_id: &str,
        conversation_id: &ConversationId,
        text: &str,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<()> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyMessage.into());
        }

        let session = {
            let sessions = self.sessions.read().await;
            sessions.get(client_id).cloned()
        }
        .ok_or_else(|| Error::Internal(format!("no session for client {client_id}")))?;

        // Admission: exactly one generation per session, no queueing.
        {
            let mut state = session.state.lock().await;
            if !state.ready() {
                return Err(Error::Busy);
            }
            *state = SessionState::Generating;
        }

        // Everything past admission must put the state back on failure.
        match self
            .start_generation(&session, client_id, conversation_id, trimmed, events)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => {
                let mut state = session.state.lock().await;
                *state = match e {
                    // Rejected input mutates nothing; the session stays clean.
                    Error::Validation(_) | Error::NotFound(_) => SessionState::Idle,
                    _ => SessionState::Failed,
                };
                Err(e)
            }
        }
    }

    async fn start_generation(
        &self,
        session: &Arc<Session>,
        client_id: &str,
        conversation_id: &ConversationId,
        text: &str,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<()> {
        let mut conversation = self.store.get(conversation_id).await?;

        // Persist the user turn first; it survives any later failure.
        let user_turn = Turn::user(text);
        let total = self
            .store
            .append_turn(conversation_id, user_turn.clone())
            .await?;
        conversation.push_turn(user_turn);

        let _ = events
            .send(SessionEvent::TokenUsage {
                total_tokens: total,
            })
            .await;

        let prompt = self.assembler.assemble(&conversation)?;
        debug!(
            client_id,
            conversation_id = %conversation_id,
            prompt_tokens = prompt.prompt_tokens,
            dropped_turns = prompt.dropped_turns,
            "prompt assembled"
        );

        let request = GenerateRequest {
            segments: prompt.segments,
            max_tokens: self.config.reply_tokens as u32,
            temperature: self.config.temperature,
        };

        let mut rx = self.model.generate(request).await.map_err(Error::from)?;

        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        *session.cancel.lock().await = Some(cancel_tx);

        let store = Arc::clone(&self.store);
        let session = Arc::clone(session);
        let conversation_id = conversation_id.clone();
        let client_id = client_id.to_string();
        let fragment_timeout = self.config.fragment_timeout;

        tokio::spawn(async move {
            let mut buffer = String::new();

            enum Outcome {
                Completed,
                Cancelled,
                Failed(Error),
            }

            let outcome = loop {
                tokio::select! {
                    _ = &mut cancel_rx => break Outcome::Cancelled,
                    next = tokio::time::timeout(fragment_timeout, rx.recv()) => {
                        match next {
                            Err(_) => {
                                break Outcome::Failed(
                                    ModelError::Timeout(fragment_timeout.as_secs()).into(),
                                );
                            }
                            Ok(None) => {
                                break Outcome::Failed(
                                    ModelError::StreamInterrupted(
                                        "stream closed before completion".into(),
                                    )
                                    .into(),
                                );
                            }
                            Ok(Some(Err(e))) => break Outcome::Failed(e.into()),
                            Ok(Some(Ok(fragment))) => {
                                if let Some(content) = fragment.content
                                    && !content.is_empty()
                                {
                                    buffer.push_str(&content);
                                    let _ = events
                                        .send(SessionEvent::Fragment { content })
                                        .await;
                                }
                                if fragment.done {
                                    break Outcome::Completed;
                                }
                            }
                        }
                    }
                }
            };

            let final_state = match outcome {
                Outcome::Completed if buffer.is_empty() => {
                    let error: Error = ModelError::EmptyResponse.into();
                    warn!(client_id, "generation produced no content");
                    let _ = events.send(SessionEvent::from_error(&error)).await;
                    SessionState::Failed
                }
                Outcome::Completed => {
                    match store
                        .append_turn(&conversation_id, Turn::assistant(buffer))
                        .await
                    {
                        Ok(total) => {
                            let _ = events
                                .send(SessionEvent::TokenUsage {
                                    total_tokens: total,
                                })
                                .await;
                            let _ = events
                                .send(SessionEvent::Done {
                                    conversation_id: conversation_id.clone(),
                                    total_tokens: total,
                                })
                                .await;
                            debug!(client_id, conversation_id = %conversation_id, "generation complete");
                            SessionState::Idle
                        }
                        Err(e) => {
                            warn!(client_id, error = %e, "failed to persist assistant turn");
                            let _ = events.send(SessionEvent::from_error(&e)).await;
                            SessionState::Failed
                        }
                    }
                }
                Outcome::Cancelled => {
                    // Partial content is discarded, never persisted.
                    info!(client_id, conversation_id = %conversation_id, "generation cancelled");
                    SessionState::Cancelled
                }
                Outcome::Failed(error) => {
                    warn!(client_id, error = %error, "generation failed");
                    let _ = events.send(SessionEvent::from_error(&error)).await;
                    SessionState::Failed
                }
            };

            *session.cancel.lock().await = None;
            *session.state.lock().await = final_state;
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidechat_provider::ScriptedClient;
    use tidechat_provider::scripted::Script;
    use tidechat_store::InMemoryStore;

    fn test_config() -> SessionConfig {
        SessionConfig {
            max_context_tokens: 10_000,
            reply_tokens: 800,
            temperature: 0.0,
            fragment_timeout: Duration::from_secs(5),
        }
    }

    fn manager_with(scripts: Vec<Script>) -> (SessionManager, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let model = Arc::new(ScriptedClient::new(scripts));
        let manager = SessionManager::new(store.clone(), model, test_config());
        (manager, store)
    }

    async fn drain(mut rx: mpsc::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut collected = Vec::new();
        while let Some(event) = rx.recv().await {
            collected.push(event);
        }
        collected
    }

    #[tokio::test]
    async fn empty_message_is_rejected_before_anything_happens() {
        let (manager, store) = manager_with(vec![]);
        manager.connect("c1").await;
        let conv = store.create().await.unwrap();
        let (tx, _rx) = mpsc::channel(8);

        let err = manager
            .submit_message("c1", &conv.id, "   ", tx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation_error");
        assert!(store.get(&conv.id).await.unwrap().turns.is_empty());
        assert_eq!(manager.state("c1").await, Some(SessionState::Idle));
    }

    #[tokio::test]
    async fn full_round_trip_persists_both_turns() {
        let (manager, store) = manager_with(vec![Script::text("The answer is four.")]);
        manager.connect("c1").await;
        let conv = store.create().await.unwrap();
        let (tx, rx) = mpsc::channel(32);

        manager
            .submit_message("c1", &conv.id, "What is 2+2?", tx)
            .await
            .unwrap();

        let events = drain(rx).await;
        let fragments: String = events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::Fragment { content } => Some(content.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(fragments, "The answer is four.");
        assert!(matches!(events.last(), Some(SessionEvent::Done { .. })));

        let stored = store.get(&conv.id).await.unwrap();
        assert_eq!(stored.turns.len(), 2);
        assert_eq!(stored.turns[0].content, "What is 2+2?");
        assert_eq!(stored.turns[1].content, "The answer is four.");
        assert_eq!(manager.state("c1").await, Some(SessionState::Idle));

        // The final reported total matches the measured store total.
        let last_usage = events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::Done { total_tokens, .. } => Some(*total_tokens),
                _ => None,
            })
            .next_back();
        assert_eq!(last_usage, Some(stored.total_tokens));
        assert_eq!(
            stored.total_tokens,
            tidechat_context::token::measure_turns(&stored.turns)
        );
    }

    #[tokio::test]
    async fn second_submit_while_generating_is_busy() {
        let script = Script::text("slow reply").with_delay(Duration::from_millis(200));
        let (manager, store) = manager_with(vec![script]);
        manager.connect("c1").await;
        let conv = store.create().await.unwrap();

        let (tx1, rx1) = mpsc::channel(32);
        manager
            .submit_message("c1", &conv.id, "first", tx1)
            .await
            .unwrap();

        let (tx2, _rx2) = mpsc::channel(32);
        let err = manager
            .submit_message("c1", &conv.id, "second", tx2)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Busy));

        // The original generation finishes untouched: exactly one
        // assistant turn, nothing from the rejected submit.
        let events = drain(rx1).await;
        assert!(matches!(events.last(), Some(SessionEvent::Done { .. })));
        let stored = store.get(&conv.id).await.unwrap();
        assert_eq!(stored.turns.len(), 2);
        assert_eq!(stored.turns[0].content, "first");
        assert_eq!(
            stored
                .turns
                .iter()
                .filter(|t| t.role == tidechat_core::message::Role::Assistant)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn mid_stream_failure_keeps_user_turn_only() {
        let script = Script::failing_after(
            vec!["partial "],
            ModelError::StreamInterrupted("connection reset".into()),
        );
        let (manager, store) = manager_with(vec![script]);
        manager.connect("c1").await;
        let conv = store.create().await.unwrap();
        let (tx, rx) = mpsc::channel(32);

        manager
            .submit_message("c1", &conv.id, "hello", tx)
            .await
            .unwrap();

        let events = drain(rx).await;
        assert!(matches!(
            events.last(),
            Some(SessionEvent::Error { kind, .. }) if kind == "model_failure"
        ));

        // User turn persisted, partial assistant content discarded
        let stored = store.get(&conv.id).await.unwrap();
        assert_eq!(stored.turns.len(), 1);
        assert_eq!(stored.turns[0].content, "hello");
        assert_eq!(manager.state("c1").await, Some(SessionState::Failed));
    }

    #[tokio::test]
    async fn cancel_discards_partial_content() {
        let script = Script::text("a very long reply that keeps going")
            .with_delay(Duration::from_millis(50));
        let (manager, store) = manager_with(vec![script]);
        manager.connect("c1").await;
        let conv = store.create().await.unwrap();
        let (tx, mut rx) = mpsc::channel(32);

        manager
            .submit_message("c1", &conv.id, "tell me a story", tx)
            .await
            .unwrap();

        // Wait for at least one fragment so the stream is live, then cancel.
        loop {
            match rx.recv().await {
                Some(SessionEvent::Fragment { .. }) => break,
                Some(_) => continue,
                None => panic!("stream ended before any fragment"),
            }
        }
        assert!(manager.cancel("c1").await);

        // Drain remaining events; none may be Done.
        while let Some(event) = rx.recv().await {
            assert!(!matches!(event, SessionEvent::Done { .. }));
        }

        // Give the generation task a moment to finish its bookkeeping.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let stored = store.get(&conv.id).await.unwrap();
        assert_eq!(stored.turns.len(), 1, "only the user turn is persisted");
        assert_eq!(manager.state("c1").await, Some(SessionState::Cancelled));

        // The session accepts a new generation afterwards.
        assert!(manager.state("c1").await.unwrap().ready());
    }

    #[tokio::test]
    async fn cancel_with_nothing_in_flight_is_a_noop() {
        let (manager, _store) = manager_with(vec![]);
        manager.connect("c1").await;
        assert!(!manager.cancel("c1").await);
        assert!(!manager.cancel("unknown").await);
    }

    #[tokio::test]
    async fn fragment_timeout_is_a_model_failure() {
        let script = Script::text("late").with_delay(Duration::from_secs(60));
        let store = Arc::new(InMemoryStore::new());
        let model = Arc::new(ScriptedClient::new(vec![script]));
        let config = SessionConfig {
            fragment_timeout: Duration::from_millis(50),
            ..test_config()
        };
        let manager = SessionManager::new(store.clone(), model, config);
        manager.connect("c1").await;
        let conv = store.create().await.unwrap();
        let (tx, rx) = mpsc::channel(32);

        manager
            .submit_message("c1", &conv.id, "hello", tx)
            .await
            .unwrap();

        let events = drain(rx).await;
        assert!(matches!(
            events.last(),
            Some(SessionEvent::Error { kind, .. }) if kind == "model_failure"
        ));
        assert_eq!(store.get(&conv.id).await.unwrap().turns.len(), 1);
    }

    #[tokio::test]
    async fn unknown_conversation_resets_the_session() {
        let (manager, _store) = manager_with(vec![Script::text("x")]);
        manager.connect("c1").await;
        let (tx, _rx) = mpsc::channel(8);

        let err = manager
            .submit_message("c1", &ConversationId::from("missing"), "hi", tx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
        assert_eq!(manager.state("c1").await, Some(SessionState::Idle));
    }

    #[tokio::test]
    async fn disconnect_removes_the_session() {
        let (manager, _store) = manager_with(vec![]);
        manager.connect("c1").await;
        assert_eq!(manager.session_count().await, 1);

        manager.disconnect("c1").await;
        assert_eq!(manager.session_count().await, 0);
        assert!(manager.state("c1").await.is_none());
    }

    #[tokio::test]
    async fn sessions_are_independent() {
        let (manager, store) = manager_with(vec![
            Script::text("reply one"),
            Script::text("reply two"),
        ]);
        manager.connect("c1").await;
        manager.connect("c2").await;
        let conv1 = store.create().await.unwrap();
        let conv2 = store.create().await.unwrap();

        let (tx1, rx1) = mpsc::channel(32);
        let (tx2, rx2) = mpsc::channel(32);
        manager.submit_message("c1", &conv1.id, "one", tx1).await.unwrap();
        manager.submit_message("c2", &conv2.id, "two", tx2).await.unwrap();

        let events1 = drain(rx1).await;
        let events2 = drain(rx2).await;
        assert!(matches!(events1.last(), Some(SessionEvent::Done { .. })));
        assert!(matches!(events2.last(), Some(SessionEvent::Done { .. })));
        assert_eq!(store.get(&conv1.id).await.unwrap().turns.len(), 2);
        assert_eq!(store.get(&conv2.id).await.unwrap().turns.len(), 2);
    }
}
