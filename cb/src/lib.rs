//! ContextBuilder - token-budgeted LLM context assembly
//!
//! Gathers SOPs (graph-backed), git state, related test files, and
//! convention documents into a single bundle under a strict token budget.
//! Each task type has a fixed gathering strategy; the review strategy is
//! SOPs (all-or-nothing) → diff → test files → conventions.
//!
//! # Modules
//!
//! - [`builder`] - strategy execution and bundle assembly
//! - [`budget`] - token accounting and estimation
//! - [`file`] - repository file gathering with containment checks
//! - [`git`] - diff/changed-files wrappers over the git binary
//! - [`graph`] - GraphQL client for the graph gateway
//! - [`sop`] - SOP retrieval and the four match strategies

pub mod budget;
pub mod builder;
pub mod cli;
pub mod error;
pub mod file;
pub mod git;
pub mod graph;
pub mod sop;
pub mod strategy;
pub mod types;

pub use budget::{TokenBudget, TokenEstimator};
pub use builder::{CapabilityBudgets, ContextBuilder, DEFAULT_TOKEN_BUDGET};
pub use error::ContextError;
pub use file::FileGatherer;
pub use git::{GitGatherer, truncate_diff_by_files, validate_git_ref};
pub use graph::{Entity, GraphClient, TraversalDirection, Triple};
pub use types::{
    ContextRequest, ContextResponse, Decision, EntityRef, Severity, SopDocument, SopScope, TaskType,
};
