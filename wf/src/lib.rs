//! Workfabric - reactive workflow fabric for LLM-driven pipelines
//!
//! A set of stateless workers coordinated through two durable substrates:
//! a subject-filtered message stream and a revision-guarded state KV
//! bucket. A reactive engine (external) watches phase transitions in the
//! KV and dispatches the next worker; each worker consumes its trigger
//! subject, does one unit of work, and writes the next phase under an
//! optimistic revision guard.
//!
//! # Modules
//!
//! - [`fabric`] - broker substrate traits, NATS and in-memory bindings
//! - [`state`] - execution state and declarative phase machines
//! - [`worker`] - the canonical worker harness and format-correction retry
//! - [`workers`] - planner, reviewers, task generator, developer, validator
//! - [`checklist`] - the deterministic structural check runner
//! - [`llm`] - chat-completions client, capability registry, call store
//! - [`envelope`] - typed message envelope and payload registry
//! - [`config`] - configuration types and loading

pub mod checklist;
pub mod cli;
pub mod config;
pub mod envelope;
pub mod fabric;
pub mod llm;
pub mod prompts;
pub mod state;
pub mod worker;
pub mod workers;

// Re-export commonly used types
pub use config::{Config, WorkerConfig, parse_duration};
pub use envelope::{Envelope, EnvelopeError, Payload, PayloadRegistry};
pub use fabric::{
    ConsumerSpec, Delivery, FabricError, MemoryFabric, MessageFetcher, NatsFabric, StateEntry, StateError,
    StateStore, WorkflowStream,
};
pub use llm::{CallStore, ChatMessage, CompletionRequest, CompletionResponse, HttpLlmClient, LlmClient, LlmError,
    ModelRegistry, TraceContext};
pub use state::{
    ExecutionState, Finding, FindingSeverity, PhaseError, StateUpdate, WorkflowMachine, format_findings, machine_for,
};
pub use worker::{
    MAX_FORMAT_RETRIES, Trigger, TriggerCommon, TriggerHandler, Worker, WorkerError, WorkerHandle, WorkerMetrics,
    complete_json, extract_json,
};
