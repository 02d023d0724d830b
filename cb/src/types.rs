//! Request, response, and document types for context assembly

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The kind of work a context bundle is being assembled for.
///
/// Each task type selects a gathering strategy (ordering and allocation
/// policy) in the builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TaskType {
    #[default]
    Planning,
    PlanReview,
    TaskGeneration,
    TaskReview,
    CodeReview,
    Development,
}

impl TaskType {
    /// Which SOP scope applies to this task type
    pub fn sop_scope(&self) -> SopScope {
        match self {
            TaskType::Planning | TaskType::PlanReview => SopScope::Plan,
            _ => SopScope::Code,
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskType::Planning => "planning",
            TaskType::PlanReview => "plan-review",
            TaskType::TaskGeneration => "task-generation",
            TaskType::TaskReview => "task-review",
            TaskType::CodeReview => "code-review",
            TaskType::Development => "development",
        };
        write!(f, "{}", s)
    }
}

/// Everything a caller can tell the builder about the work at hand
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextRequest {
    /// What the context is for (selects the strategy)
    pub task_type: TaskType,

    /// Free-form topic, usually the plan title
    pub topic: String,

    /// Slug of the plan this work belongs to
    pub plan_slug: Option<String>,

    /// Raw plan content when the caller already has it
    pub plan_content: Option<String>,

    /// Glob patterns bounding the work's scope
    pub scope_patterns: Vec<String>,

    /// Files already changed by the work
    pub files: Vec<String>,

    /// Git ref to diff against (validated before use)
    pub git_ref: Option<String>,

    /// Capability label used to pick the token budget
    pub capability: Option<String>,

    /// Whether the graph gateway is expected to be reachable
    pub graph_ready: bool,
}

/// Reference to a graph entity included in the bundle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRef {
    pub id: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub tokens: usize,
}

/// The assembled context bundle
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextResponse {
    /// Gathered documents keyed by repository-relative path
    pub documents: BTreeMap<String, String>,

    /// Git diff text (possibly truncated at file boundaries)
    pub diffs: String,

    /// Graph entities folded into the bundle
    pub entities: Vec<EntityRef>,

    /// Ids of the SOPs included
    pub sop_ids: Vec<String>,

    /// Semantic domains inferred from the changed files
    pub domains: Vec<String>,

    /// Tokens consumed by the bundle
    pub tokens_used: usize,

    /// True when any gathered content was cut to fit the budget
    pub truncated: bool,

    /// Populated instead of content when the build failed
    pub error: Option<String>,
}

/// Scope of an SOP document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SopScope {
    Plan,
    #[default]
    Code,
    All,
}

impl SopScope {
    /// Parse a scope string from graph triples, defaulting to `code`
    pub fn parse(s: &str) -> Self {
        match s {
            "plan" => SopScope::Plan,
            "all" => SopScope::All,
            _ => SopScope::Code,
        }
    }

    /// `all` matches any requested scope, in either direction
    pub fn matches(&self, requested: SopScope) -> bool {
        *self == SopScope::All || requested == SopScope::All || *self == requested
    }
}

/// Severity attached to an SOP
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    #[default]
    Info,
}

impl Severity {
    pub fn parse(s: &str) -> Self {
        match s {
            "error" => Severity::Error,
            "warning" => Severity::Warning,
            _ => Severity::Info,
        }
    }
}

/// A Standard Operating Procedure retrieved from the graph
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SopDocument {
    pub id: String,
    pub title: String,
    pub content: String,

    /// Glob the SOP applies to; empty applies universally
    pub applies_to: String,

    #[serde(rename = "type")]
    pub doc_type: String,

    pub scope: SopScope,
    pub severity: Severity,

    pub domains: Vec<String>,
    pub related_domains: Vec<String>,
    pub keywords: Vec<String>,

    /// Authoritative SOPs override conflicting guidance
    pub authority: bool,

    /// Estimated token cost of the content
    pub tokens: usize,
}

impl SopDocument {
    /// An SOP with an empty `applies_to` glob applies to every file
    pub fn applies_universally(&self) -> bool {
        self.applies_to.is_empty()
    }
}

/// A git commit projected into the graph as an engineering decision
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Decision {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub file: String,
    pub commit: String,
    pub message: String,
    pub branch: String,
    pub agent: String,
    pub loop_id: String,
    pub operation: String,
    pub timestamp: Option<DateTime<Utc>>,
}
