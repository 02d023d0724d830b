//! The pipeline workers
//!
//! Planner, reviewers, task generator, developer, and the structural
//! validator. The LLM workers share one shape: build context, call the
//! model with format-correction retry, parse, and hand the harness a
//! state update.

mod developer;
mod planner;
mod reviewer;
mod task_generator;
pub mod triggers;
mod validator;

use std::sync::Arc;
use std::time::Duration;

use contextbuilder::{ContextBuilder, ContextRequest, ContextResponse};
use serde::{Deserialize, Serialize};

use crate::llm::{CallStore, LlmClient};
use crate::prompts::PromptRegistry;
use crate::state::Finding;
use crate::worker::{ParsedCompletion, WorkerError};

pub use developer::{Developer, DeveloperOutcome, FileChange};
pub use planner::{PlanPayload, PlanPhase, Planner};
pub use reviewer::{CodeReviewer, PlanReviewer, TaskReviewer};
pub use task_generator::{TaskGenerator, TaskListPayload};
pub use validator::StructuralValidator;

/// Dependencies shared by every LLM worker
pub struct LlmDeps {
    pub llm: Arc<dyn LlmClient>,
    pub prompts: Arc<PromptRegistry>,
    pub context: Arc<ContextBuilder>,
    pub calls: Arc<CallStore>,

    /// Capability label this worker calls with
    pub capability: String,
    pub temperature: f32,
    pub max_tokens: u32,

    pub context_timeout: Duration,

    /// Whether SOP gathering should even be attempted
    pub graph_ready: bool,
}

impl LlmDeps {
    /// Build a context bundle, bounded by the configured timeout.
    ///
    /// A budget error in the response is a business failure; a timeout is
    /// transient.
    pub async fn build_context(&self, mut request: ContextRequest) -> Result<ContextResponse, WorkerError> {
        request.capability = Some(self.capability.clone());
        request.graph_ready = self.graph_ready;

        let response = tokio::time::timeout(self.context_timeout, self.context.build(&request))
            .await
            .map_err(|_| WorkerError::Transient("context build timed out".to_string()))?;

        if let Some(error) = &response.error {
            return Err(WorkerError::Business(format!("context build failed: {error}")));
        }
        Ok(response)
    }

    /// Record every request id of a parsed completion against an execution
    pub fn record_calls<T>(&self, execution_id: &str, parsed: &ParsedCompletion<T>) {
        let last = parsed.request_ids.len().saturating_sub(1);
        for (i, request_id) in parsed.request_ids.iter().enumerate() {
            let tokens = if i == last { parsed.tokens_used } else { 0 };
            self.calls
                .record(execution_id, request_id, &self.capability, &parsed.model, tokens);
        }
    }
}

/// Render a context bundle into prompt text
pub fn render_context(response: &ContextResponse) -> String {
    let mut out = String::new();

    for (path, content) in &response.documents {
        out.push_str(&format!("## {path}\n\n{content}\n\n"));
    }
    if !response.diffs.is_empty() {
        out.push_str(&format!("## Diff\n\n{}\n\n", response.diffs));
    }

    out.trim_end().to_string()
}

/// The SOP portion of a context bundle, plus any caller-provided SOP
/// context, rendered for a reviewer prompt.
pub fn render_sops(response: &ContextResponse, extra: Option<&str>) -> String {
    let mut out = String::new();
    for (path, content) in &response.documents {
        if path.starts_with("sops/") {
            out.push_str(&format!("### {path}\n\n{content}\n\n"));
        }
    }
    if let Some(extra) = extra {
        out.push_str(extra);
        out.push('\n');
    }
    out.trim_end().to_string()
}

/// Reviewer verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Approved,
    NeedsChanges,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Approved => "approved",
            Verdict::NeedsChanges => "needs_changes",
        }
    }
}

/// Parsed reviewer output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewOutcome {
    pub verdict: Verdict,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub findings: Vec<Finding>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_serde() {
        let outcome: ReviewOutcome =
            serde_json::from_str(r#"{"verdict": "needs_changes", "summary": "x", "findings": []}"#).unwrap();
        assert_eq!(outcome.verdict, Verdict::NeedsChanges);
        assert_eq!(outcome.verdict.as_str(), "needs_changes");
    }

    #[test]
    fn test_render_context_sections() {
        let mut response = ContextResponse::default();
        response
            .documents
            .insert("CONVENTIONS.md".to_string(), "be kind".to_string());
        response.diffs = "diff --git a/x b/x".to_string();

        let out = render_context(&response);
        assert!(out.contains("## CONVENTIONS.md"));
        assert!(out.contains("## Diff"));
    }

    #[test]
    fn test_render_sops_filters_and_merges() {
        let mut response = ContextResponse::default();
        response.documents.insert("sops/auth.md".to_string(), "rule".to_string());
        response.documents.insert("CONVENTIONS.md".to_string(), "other".to_string());

        let out = render_sops(&response, Some("caller-provided"));
        assert!(out.contains("sops/auth.md"));
        assert!(!out.contains("CONVENTIONS.md"));
        assert!(out.contains("caller-provided"));
    }
}
