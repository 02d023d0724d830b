//! Chat request and response types
//!
//! Models an OpenAI-style chat-completions endpoint; the capability label
//! on the request resolves to a concrete model and URL at call time.

use serde::{Deserialize, Serialize};

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

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

/// Correlation identifiers attached to a call for tracing
#[derive(Debug, Clone, Default)]
pub struct TraceContext {
    pub trace_id: Option<String>,
    pub loop_id: Option<String>,
}

impl TraceContext {
    pub fn is_empty(&self) -> bool {
        self.trace_id.is_none() && self.loop_id.is_none()
    }
}

/// Everything needed for one completion call
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Capability label; resolved to (endpoint, model) by the registry
    pub capability: String,

    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,

    /// Carried onto the HTTP call as trace headers
    pub trace: TraceContext,
}

/// Response from a completion call
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub model: String,
    pub tokens_used: u64,
    pub request_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        let msg = ChatMessage::system("schema here");
        assert_eq!(msg.role, Role::System);

        let msg = ChatMessage::user("hello");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "hello");
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&ChatMessage::assistant("hi")).unwrap();
        assert!(json.contains("\"role\":\"assistant\""));
    }

    #[test]
    fn test_trace_context_is_empty() {
        assert!(TraceContext::default().is_empty());
        let trace = TraceContext {
            trace_id: Some("t-1".to_string()),
            loop_id: None,
        };
        assert!(!trace.is_empty());
    }
}
