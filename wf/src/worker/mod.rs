//! Canonical worker pattern
//!
//! Every worker is a durable consumer on its trigger subject plus a
//! handler. The harness owns the message protocol: decode/validate,
//! in-progress signalling, the revision-guarded state write, and the
//! ack/nak decision.

mod harness;
mod retry;

use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::envelope::Payload;
use crate::llm::LlmError;
use crate::state::StateUpdate;

pub use harness::{Trigger, TriggerHandler, Worker, WorkerHandle};
pub use retry::{MAX_FORMAT_RETRIES, ParsedCompletion, RetryError, complete_json, extract_json};

/// How a handler failure should be treated
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Broker should retry the message (nak)
    #[error("transient: {0}")]
    Transient(String),

    /// The work itself failed; the workflow moves to its failed phase
    #[error("{0}")]
    Business(String),
}

impl From<LlmError> for WorkerError {
    fn from(e: LlmError) -> Self {
        if e.is_retryable() {
            WorkerError::Transient(e.to_string())
        } else {
            WorkerError::Business(e.to_string())
        }
    }
}

impl From<crate::fabric::StateError> for WorkerError {
    fn from(e: crate::fabric::StateError) -> Self {
        WorkerError::Transient(e.to_string())
    }
}

impl From<RetryError> for WorkerError {
    fn from(e: RetryError) -> Self {
        match e {
            RetryError::Llm(inner) => inner.into(),
            exhausted @ RetryError::FormatExhausted { .. } => WorkerError::Business(exhausted.to_string()),
        }
    }
}

/// Correlation fields every trigger payload carries
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerCommon {
    pub execution_id: String,
    pub slug: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loop_id: Option<String>,

    /// Explicit ack channel for async-step workflows
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

impl TriggerCommon {
    /// Baseline validation shared by every trigger type
    pub fn validate(&self) -> Result<(), String> {
        if self.execution_id.is_empty() {
            return Err("execution_id is required".to_string());
        }
        if self.slug.is_empty() {
            return Err("slug is required".to_string());
        }
        Ok(())
    }

    pub fn trace(&self) -> crate::llm::TraceContext {
        crate::llm::TraceContext {
            trace_id: self.trace_id.clone(),
            loop_id: self.loop_id.clone(),
        }
    }
}

/// Result payload published on `workflow.result.<worker>.<slug>`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkResult {
    pub execution_id: String,
    pub slug: String,
    pub worker: String,
    pub phase: String,
    pub update: StateUpdate,
}

impl Payload for WorkResult {
    const DOMAIN: &'static str = "workflow";
    const CATEGORY: &'static str = "result";
    const VERSION: &'static str = "1";
}

/// Callback payload for async-step workflows
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepCallback {
    pub execution_id: String,
    pub task_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Payload for StepCallback {
    const DOMAIN: &'static str = "workflow";
    const CATEGORY: &'static str = "step-callback";
    const VERSION: &'static str = "1";
}

/// Per-worker counters
#[derive(Debug, Default)]
pub struct WorkerMetrics {
    triggers_processed: AtomicU64,
    triggers_success: AtomicU64,
    triggers_failed: AtomicU64,
    last_activity: RwLock<Option<Instant>>,
}

impl WorkerMetrics {
    pub fn record_trigger(&self) {
        self.triggers_processed.fetch_add(1, Ordering::Relaxed);
        *self.last_activity.write().expect("metrics lock poisoned") = Some(Instant::now());
    }

    pub fn record_success(&self) {
        self.triggers_success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.triggers_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            triggers_processed: self.triggers_processed.load(Ordering::Relaxed),
            triggers_success: self.triggers_success.load(Ordering::Relaxed),
            triggers_failed: self.triggers_failed.load(Ordering::Relaxed),
            last_activity_age: self
                .last_activity
                .read()
                .expect("metrics lock poisoned")
                .map(|t| t.elapsed()),
        }
    }
}

/// Point-in-time view of a worker's counters
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub triggers_processed: u64,
    pub triggers_success: u64,
    pub triggers_failed: u64,
    pub last_activity_age: Option<Duration>,
}
