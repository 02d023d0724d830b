//! Format-correction retry
//!
//! LLM workers that expect JSON re-prompt on parse failure: the bad
//! output goes back as an assistant turn, followed by a user turn that
//! embeds the parse error. The system prompt stays at message index
//! zero and the conversation only ever grows.

use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

use crate::llm::{ChatMessage, CompletionRequest, LlmClient, LlmError, TraceContext};
use crate::prompts::PromptRegistry;

/// How many correction rounds before giving up
pub const MAX_FORMAT_RETRIES: u32 = 5;

/// Errors from a JSON-expecting completion
#[derive(Debug, Error)]
pub enum RetryError {
    /// Hard LLM error; never retried inside the worker
    #[error(transparent)]
    Llm(#[from] LlmError),

    /// The model never produced parseable output
    #[error("output did not parse after {attempts} attempts: {last_error}")]
    FormatExhausted {
        attempts: u32,
        last_error: String,
        request_ids: Vec<String>,
    },
}

/// A parsed completion with its call bookkeeping
#[derive(Debug)]
pub struct ParsedCompletion<T> {
    pub value: T,
    pub request_ids: Vec<String>,
    pub model: String,
    pub tokens_used: u64,
}

/// Pull the first JSON document out of a model reply, tolerating fences
/// and prose around it.
pub fn extract_json(content: &str) -> Result<serde_json::Value, String> {
    let trimmed = content.trim();

    // Direct parse first
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    // Then the outermost brace/bracket span
    let start = trimmed.find(['{', '[']).ok_or("no JSON document found")?;
    let close = match &trimmed[start..start + 1] {
        "{" => '}',
        _ => ']',
    };
    let end = trimmed.rfind(close).ok_or("unterminated JSON document")?;
    if end <= start {
        return Err("unterminated JSON document".to_string());
    }

    serde_json::from_str(&trimmed[start..=end]).map_err(|e| e.to_string())
}

/// Call the LLM until the reply parses as `T`, correcting format up to
/// [`MAX_FORMAT_RETRIES`] times.
///
/// `messages` must start with the system prompt (which carries the
/// schema) followed by the user prompt.
pub async fn complete_json<T: DeserializeOwned>(
    llm: &dyn LlmClient,
    prompts: &PromptRegistry,
    capability: &str,
    mut messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    trace: TraceContext,
) -> Result<ParsedCompletion<T>, RetryError> {
    let mut request_ids = Vec::new();
    let mut last_error = String::new();

    for attempt in 0..=MAX_FORMAT_RETRIES {
        let response = llm
            .complete(CompletionRequest {
                capability: capability.to_string(),
                messages: messages.clone(),
                temperature,
                max_tokens,
                trace: trace.clone(),
            })
            .await?;
        request_ids.push(response.request_id.clone());

        let parsed = extract_json(&response.content)
            .and_then(|value| serde_json::from_value::<T>(value).map_err(|e| e.to_string()));

        match parsed {
            Ok(value) => {
                debug!(attempt, "completion parsed");
                return Ok(ParsedCompletion {
                    value,
                    request_ids,
                    model: response.model,
                    tokens_used: response.tokens_used,
                });
            }
            Err(reason) => {
                warn!(attempt, %reason, "completion did not parse, correcting");
                last_error = reason.clone();
                messages.push(ChatMessage::assistant(response.content));
                messages.push(ChatMessage::user(prompts.format_correction(&reason)));
            }
        }
    }

    Err(RetryError::FormatExhausted {
        attempts: MAX_FORMAT_RETRIES + 1,
        last_error,
        request_ids,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedLlm;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Verdict {
        verdict: String,
    }

    fn base_messages() -> Vec<ChatMessage> {
        vec![ChatMessage::system("schema"), ChatMessage::user("review this")]
    }

    #[test]
    fn test_extract_json_plain() {
        let value = extract_json(r#"{"verdict": "approved"}"#).unwrap();
        assert_eq!(value["verdict"], "approved");
    }

    #[test]
    fn test_extract_json_fenced() {
        let value = extract_json("```json\n{\"verdict\": \"approved\"}\n```").unwrap();
        assert_eq!(value["verdict"], "approved");
    }

    #[test]
    fn test_extract_json_with_prose() {
        let value = extract_json("Here is the result: {\"n\": 1} hope it helps").unwrap();
        assert_eq!(value["n"], 1);
    }

    #[test]
    fn test_extract_json_none() {
        assert!(extract_json("no json here at all").is_err());
    }

    #[tokio::test]
    async fn test_parses_first_try() {
        let llm = ScriptedLlm::new().respond(r#"{"verdict": "approved"}"#);
        let prompts = PromptRegistry::new();

        let parsed: ParsedCompletion<Verdict> = complete_json(
            &llm,
            &prompts,
            "reviewing",
            base_messages(),
            0.0,
            1000,
            TraceContext::default(),
        )
        .await
        .unwrap();

        assert_eq!(parsed.value.verdict, "approved");
        assert_eq!(parsed.request_ids.len(), 1);
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn test_correction_grows_conversation_monotonically() {
        let llm = ScriptedLlm::new()
            .respond("definitely not json")
            .respond("still not json")
            .respond(r#"{"verdict": "approved"}"#);
        let prompts = PromptRegistry::new();

        let parsed: ParsedCompletion<Verdict> = complete_json(
            &llm,
            &prompts,
            "reviewing",
            base_messages(),
            0.0,
            1000,
            TraceContext::default(),
        )
        .await
        .unwrap();
        assert_eq!(parsed.value.verdict, "approved");

        // After k corrections the message list is 2 + 2k, with the
        // system prompt still at index 0
        let calls = llm.calls();
        for (k, call) in calls.iter().enumerate() {
            assert_eq!(call.messages.len(), 2 + 2 * k);
            assert!(matches!(call.messages[0].role, crate::llm::Role::System));
        }
        assert_eq!(parsed.request_ids.len(), 3);
    }

    #[tokio::test]
    async fn test_format_exhausted_after_max_retries() {
        let mut llm = ScriptedLlm::new();
        for _ in 0..=MAX_FORMAT_RETRIES {
            llm = llm.respond("nope");
        }
        let prompts = PromptRegistry::new();

        let err = complete_json::<Verdict>(
            &llm,
            &prompts,
            "reviewing",
            base_messages(),
            0.0,
            1000,
            TraceContext::default(),
        )
        .await
        .unwrap_err();

        match err {
            RetryError::FormatExhausted {
                attempts, request_ids, ..
            } => {
                assert_eq!(attempts, MAX_FORMAT_RETRIES + 1);
                assert_eq!(request_ids.len(), (MAX_FORMAT_RETRIES + 1) as usize);
            }
            other => panic!("expected FormatExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_hard_llm_error_surfaces_immediately() {
        let llm = ScriptedLlm::new().fail(LlmError::ApiError {
            status: 503,
            message: "overloaded".to_string(),
        });
        let prompts = PromptRegistry::new();

        let err = complete_json::<Verdict>(
            &llm,
            &prompts,
            "reviewing",
            base_messages(),
            0.0,
            1000,
            TraceContext::default(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, RetryError::Llm(_)));
        assert_eq!(llm.call_count(), 1);
    }
}
