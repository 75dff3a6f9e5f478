//! Events relayed to clients during a streaming session.

use serde::{Deserialize, Serialize};
use tidechat_core::error::Error;
use tidechat_core::message::ConversationId;

/// A server-to-client session event.
///
/// Serialized with a `type` tag so clients can switch on it:
/// `{"type":"fragment","content":"..."}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// An incremental piece of the model's reply.
    Fragment { content: String },

    /// The conversation's running token total changed.
    TokenUsage { total_tokens: usize },

    /// The generation finished and the reply was persisted.
    Done {
        conversation_id: ConversationId,
        total_tokens: usize,
    },

    /// Something went wrong. `kind` is stable and machine-readable.
    Error { kind: String, message: String },
}

impl SessionEvent {
    /// The wire-level event type name.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Fragment { .. } => "fragment",
            Self::TokenUsage { .. } => "token_usage",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }

    /// Build an error event from a domain error.
    pub fn from_error(error: &Error) -> Self {
        Self::Error {
            kind: error.kind().to_string(),
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidechat_core::error::ModelError;

    #[test]
    fn fragment_wire_format() {
        let event = SessionEvent::Fragment {
            content: "Hello".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"type":"fragment","content":"Hello"}"#);
    }

    #[test]
    fn done_carries_conversation_id() {
        let event = SessionEvent::Done {
            conversation_id: ConversationId::from("abc"),
            total_tokens: 42,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"done""#));
        assert!(json.contains("abc"));
        assert!(json.contains("42"));
    }

    #[test]
    fn error_event_uses_stable_kind() {
        let err: Error = ModelError::Timeout(30).into();
        let event = SessionEvent::from_error(&err);
        assert_eq!(event.event_type(), "error");
        match event {
            SessionEvent::Error { kind, message } => {
                assert_eq!(kind, "model_failure");
                assert!(message.contains("30s"));
            }
            _ => panic!("expected error event"),
        }
    }

    #[test]
    fn events_roundtrip() {
        let event = SessionEvent::TokenUsage { total_tokens: 7 };
        let json = serde_json::to_string(&event).unwrap();
        let back: SessionEvent = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, SessionEvent::TokenUsage { total_tokens: 7 }));
    }
}
