//! Model registry and call store
//!
//! Both are process-wide state with an explicit construction lifecycle,
//! injected into workers as `Arc`s at build time.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::error::LlmError;
use crate::config::LlmConfig;

/// Resolved binding for one capability
#[derive(Debug, Clone)]
pub struct ModelBinding {
    pub capability: String,
    pub model: String,
    pub endpoint: String,
    pub token_budget: usize,
    pub temperature: f32,
}

/// Maps capability labels onto model bindings
#[derive(Debug, Default)]
pub struct ModelRegistry {
    bindings: HashMap<String, ModelBinding>,
    default_capability: String,
}

impl ModelRegistry {
    /// Build the registry from configuration
    pub fn from_config(config: &LlmConfig) -> Self {
        let bindings = config
            .capabilities
            .iter()
            .map(|(capability, c)| {
                (
                    capability.clone(),
                    ModelBinding {
                        capability: capability.clone(),
                        model: c.model.clone(),
                        endpoint: c.endpoint.clone().unwrap_or_else(|| config.endpoint.clone()),
                        token_budget: c.token_budget,
                        temperature: c.temperature.unwrap_or(config.temperature),
                    },
                )
            })
            .collect();

        Self {
            bindings,
            default_capability: config.default_capability.clone(),
        }
    }

    /// Resolve a capability, falling back to the default capability
    pub fn resolve(&self, capability: &str) -> Result<&ModelBinding, LlmError> {
        self.bindings
            .get(capability)
            .or_else(|| self.bindings.get(&self.default_capability))
            .ok_or_else(|| LlmError::UnknownCapability(capability.to_string()))
    }

    /// All capability labels with bindings
    pub fn capabilities(&self) -> Vec<&str> {
        self.bindings.keys().map(|s| s.as_str()).collect()
    }

    /// Token budgets per capability, for seeding the context builder
    pub fn token_budgets(&self) -> Vec<(String, usize)> {
        self.bindings
            .iter()
            .map(|(c, b)| (c.clone(), b.token_budget))
            .collect()
    }
}

/// One recorded LLM call
#[derive(Debug, Clone, Serialize)]
pub struct CallRecord {
    pub execution_id: String,
    pub request_id: String,
    pub capability: String,
    pub model: String,
    pub tokens_used: u64,
    pub at: DateTime<Utc>,
}

/// Append-only record of every LLM call the process made
#[derive(Debug, Default)]
pub struct CallStore {
    records: RwLock<Vec<CallRecord>>,
}

impl CallStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &self,
        execution_id: impl Into<String>,
        request_id: impl Into<String>,
        capability: impl Into<String>,
        model: impl Into<String>,
        tokens_used: u64,
    ) {
        let record = CallRecord {
            execution_id: execution_id.into(),
            request_id: request_id.into(),
            capability: capability.into(),
            model: model.into(),
            tokens_used,
            at: Utc::now(),
        };
        self.records.write().expect("call store lock poisoned").push(record);
    }

    /// Calls made on behalf of one execution
    pub fn for_execution(&self, execution_id: &str) -> Vec<CallRecord> {
        self.records
            .read()
            .expect("call store lock poisoned")
            .iter()
            .filter(|r| r.execution_id == execution_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().expect("call store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total tokens consumed across all calls
    pub fn total_tokens(&self) -> u64 {
        self.records
            .read()
            .expect("call store lock poisoned")
            .iter()
            .map(|r| r.tokens_used)
            .sum()
    }
}
