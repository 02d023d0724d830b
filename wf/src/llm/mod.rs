//! LLM client, capability registry, and call store

mod client;
mod error;
mod registry;
pub mod testing;
mod types;

pub use client::{HttpLlmClient, LlmClient};
pub use error::LlmError;
pub use registry::{CallRecord, CallStore, ModelBinding, ModelRegistry};
pub use types::{ChatMessage, CompletionRequest, CompletionResponse, Role, TraceContext};
