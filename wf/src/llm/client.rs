//! Chat-completions client
//!
//! OpenAI-style `POST {endpoint}/chat/completions`; the capability on the
//! request resolves to (model, endpoint) through the registry.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::error::LlmError;
use super::registry::ModelRegistry;
use super::types::{CompletionRequest, CompletionResponse};

/// Anything that can complete a chat request
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;
}

/// HTTP client against a chat-completions endpoint
pub struct HttpLlmClient {
    registry: Arc<ModelRegistry>,
    http: reqwest::Client,
    api_key: Option<String>,
}

impl HttpLlmClient {
    /// Build a client. The API key is read from the environment variable
    /// named in config, when one is configured.
    pub fn new(registry: Arc<ModelRegistry>, timeout: Duration, api_key_env: Option<&str>) -> Result<Self, LlmError> {
        let api_key = api_key_env.and_then(|var| std::env::var(var).ok());
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(LlmError::Network)?;
        Ok(Self {
            registry,
            http,
            api_key,
        })
    }

    fn build_request_body(&self, model: &str, request: &CompletionRequest) -> serde_json::Value {
        serde_json::json!({
            "model": model,
            "messages": request.messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        })
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let binding = self.registry.resolve(&request.capability)?;
        let url = format!("{}/chat/completions", binding.endpoint.trim_end_matches('/'));
        let body = self.build_request_body(&binding.model, &request);

        debug!(capability = %request.capability, model = %binding.model, "llm call");

        let mut http_request = self.http.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            http_request = http_request.bearer_auth(key);
        }
        if let Some(trace_id) = &request.trace.trace_id {
            http_request = http_request.header("x-trace-id", trace_id);
        }
        if let Some(loop_id) = &request.trace.loop_id {
            http_request = http_request.header("x-loop-id", loop_id);
        }

        let response = http_request.send().await?;

        if response.status().as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(LlmError::RateLimited {
                retry_after: Duration::from_secs(retry_after),
            });
        }

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::ApiError { status, message: text });
        }

        let api_response: ChatCompletionResponse = response.json().await?;
        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("response carried no choices".to_string()))?;

        // Some endpoints omit the id; requests still need one for the
        // append-only call record
        let request_id = if api_response.id.is_empty() {
            uuid::Uuid::now_v7().to_string()
        } else {
            api_response.id
        };

        Ok(CompletionResponse {
            content: choice.message.content,
            model: api_response.model,
            tokens_used: api_response.usage.map(|u| u.total_tokens).unwrap_or(0),
            request_id,
        })
    }
}

// Chat-completions wire types

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    model: String,
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    total_tokens: u64,
}
