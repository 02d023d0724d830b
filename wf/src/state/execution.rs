//! Execution state - the single KV aggregate per running workflow

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One running workflow instance, keyed by `execution_id` in the state
/// bucket. Updated only as a whole, under a revision guard.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ExecutionState {
    pub execution_id: String,

    /// Which state machine applies (e.g. `plan-review`)
    pub workflow_id: String,

    /// Current phase; always from the workflow's phase alphabet
    pub phase: String,

    pub slug: String,
    pub title: String,

    // Correlation identifiers carried end-to-end
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loop_id: Option<String>,

    pub iteration: u32,
    pub max_iterations: u32,

    /// Last failure cause
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    // Phase-specific payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_content: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tasks: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub findings: Option<Value>,
    /// Human-readable projection of `findings`; the only findings form
    /// that may be embedded into prompts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formatted_findings: Option<String>,
    pub files_modified: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_passed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checks_run: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check_results: Option<Value>,

    // Append-only; mutated only through record_llm_request
    llm_request_ids: Vec<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutionState {
    /// Create a fresh execution in the given phase
    pub fn new(
        execution_id: impl Into<String>,
        workflow_id: impl Into<String>,
        phase: impl Into<String>,
        slug: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            execution_id: execution_id.into(),
            workflow_id: workflow_id.into(),
            phase: phase.into(),
            slug: slug.into(),
            title: title.into(),
            max_iterations: 3,
            created_at: now,
            updated_at: now,
            ..Default::default()
        }
    }

    /// LLM request ids recorded so far
    pub fn llm_request_ids(&self) -> &[String] {
        &self.llm_request_ids
    }

    /// Append an LLM request id. There is no removal.
    pub fn record_llm_request(&mut self, request_id: impl Into<String>) {
        self.llm_request_ids.push(request_id.into());
    }

    /// Stamp the update time; called by the machine on every advance
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Declarative set of field updates a worker produced.
///
/// `None` fields are left untouched; llm request ids are appended.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StateUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_content: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tasks: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub findings: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formatted_findings: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files_modified: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_passed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checks_run: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check_results: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iteration: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub llm_request_ids: Vec<String>,
}

impl StateUpdate {
    /// Fold this update into a state record
    pub fn apply(self, state: &mut ExecutionState) {
        if let Some(v) = self.plan_content {
            state.plan_content = Some(v);
        }
        if let Some(v) = self.tasks {
            state.tasks = Some(v);
        }
        if let Some(v) = self.verdict {
            state.verdict = Some(v);
        }
        if let Some(v) = self.summary {
            state.summary = Some(v);
        }
        if let Some(v) = self.findings {
            state.findings = Some(v);
        }
        if let Some(v) = self.formatted_findings {
            state.formatted_findings = Some(v);
        }
        if let Some(v) = self.files_modified {
            state.files_modified = v;
        }
        if let Some(v) = self.validation_passed {
            state.validation_passed = Some(v);
        }
        if let Some(v) = self.checks_run {
            state.checks_run = Some(v);
        }
        if let Some(v) = self.check_results {
            state.check_results = Some(v);
        }
        if let Some(v) = self.iteration {
            state.iteration = v;
        }
        if let Some(v) = self.error {
            state.error = Some(v);
        }
        for id in self.llm_request_ids {
            state.record_llm_request(id);
        }
    }
}
