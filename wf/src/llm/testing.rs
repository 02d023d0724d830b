//! Test support: a scripted LLM client
//!
//! Returns canned responses in order and records every request it saw,
//! so worker tests can assert on prompt construction without a network.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use super::client::LlmClient;
use super::error::LlmError;
use super::types::{CompletionRequest, CompletionResponse};

/// LLM client that replays a fixed script of responses
#[derive(Default)]
pub struct ScriptedLlm {
    responses: Mutex<VecDeque<Result<String, LlmError>>>,
    calls: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful response
    pub fn respond(self, content: impl Into<String>) -> Self {
        self.responses
            .lock()
            .expect("scripted llm lock poisoned")
            .push_back(Ok(content.into()));
        self
    }

    /// Queue an error
    pub fn fail(self, error: LlmError) -> Self {
        self.responses
            .lock()
            .expect("scripted llm lock poisoned")
            .push_back(Err(error));
        self
    }

    /// Requests seen so far, in order
    pub fn calls(&self) -> Vec<CompletionRequest> {
        self.calls.lock().expect("scripted llm lock poisoned").clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("scripted llm lock poisoned").len()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.calls
            .lock()
            .expect("scripted llm lock poisoned")
            .push(request.clone());

        let next = self
            .responses
            .lock()
            .expect("scripted llm lock poisoned")
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::InvalidResponse("script exhausted".to_string())));

        let index = self.call_count();
        next.map(|content| CompletionResponse {
            content,
            model: "scripted".to_string(),
            tokens_used: 10,
            request_id: format!("scripted-{index}"),
        })
    }
}
