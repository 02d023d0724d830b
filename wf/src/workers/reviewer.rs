//! Review workers
//!
//! Plan, task, and code review share one core: gather SOP context, and
//! when there is none at all, auto-approve - a review without SOPs has
//! nothing to judge against. Otherwise the model reviews the artifact
//! against the SOPs and the findings land in state both structured and
//! formatted.

use async_trait::async_trait;

use contextbuilder::{ContextRequest, TaskType};

use super::triggers::{CodeReviewTrigger, PlanReviewTrigger, TaskReviewTrigger};
use super::{LlmDeps, ReviewOutcome, Verdict, render_sops};
use crate::llm::{ChatMessage, TraceContext};
use crate::prompts::embedded;
use crate::state::{
    ExecutionState, PLAN_REVIEW, StateUpdate, TASK_EXECUTION, TASK_REVIEW, WorkflowMachine, format_findings,
};
use crate::worker::{TriggerCommon, TriggerHandler, WorkerError, complete_json};

/// Auto-approval note stored when no SOP context exists
const NO_SOPS_NOTE: &str = "No applicable SOPs; auto-approved.";

/// The shared review step
async fn review(
    deps: &LlmDeps,
    common: &TriggerCommon,
    request: ContextRequest,
    sop_context: Option<&str>,
    user_prompt: impl FnOnce(&str) -> String,
    trace: TraceContext,
) -> Result<StateUpdate, WorkerError> {
    let context = deps.build_context(request).await?;

    // Review auto-approve: no SOPs from the builder and none provided by
    // the trigger means there is nothing to review against.
    if context.sop_ids.is_empty() && sop_context.is_none() {
        return Ok(StateUpdate {
            verdict: Some(Verdict::Approved.as_str().to_string()),
            summary: Some(NO_SOPS_NOTE.to_string()),
            findings: Some(serde_json::json!([])),
            formatted_findings: Some(NO_SOPS_NOTE.to_string()),
            ..Default::default()
        });
    }

    let sops = render_sops(&context, sop_context);
    let messages = vec![
        ChatMessage::system(embedded::REVIEWER_SYSTEM),
        ChatMessage::user(user_prompt(&sops)),
    ];

    let parsed = complete_json::<ReviewOutcome>(
        deps.llm.as_ref(),
        &deps.prompts,
        &deps.capability,
        messages,
        deps.temperature,
        deps.max_tokens,
        trace,
    )
    .await?;
    deps.record_calls(&common.execution_id, &parsed);

    let outcome = &parsed.value;
    Ok(StateUpdate {
        verdict: Some(outcome.verdict.as_str().to_string()),
        summary: Some(outcome.summary.clone()),
        findings: Some(serde_json::to_value(&outcome.findings).map_err(|e| WorkerError::Business(e.to_string()))?),
        formatted_findings: Some(format_findings(&outcome.findings)),
        llm_request_ids: parsed.request_ids.clone(),
        ..Default::default()
    })
}

/// Reviews plans against plan-scope SOPs
pub struct PlanReviewer {
    deps: LlmDeps,
}

impl PlanReviewer {
    pub fn new(deps: LlmDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl TriggerHandler for PlanReviewer {
    type Trigger = PlanReviewTrigger;

    fn name(&self) -> &'static str {
        "plan-reviewer"
    }

    fn machine(&self) -> &'static WorkflowMachine {
        &PLAN_REVIEW
    }

    fn completion_phase(&self) -> &'static str {
        "reviewed"
    }

    fn failed_phase(&self) -> &'static str {
        "reviewer_failed"
    }

    async fn run(
        &self,
        trigger: &PlanReviewTrigger,
        _state: Option<&ExecutionState>,
    ) -> Result<StateUpdate, WorkerError> {
        let plan = serde_json::to_string_pretty(&trigger.plan_content)
            .map_err(|e| WorkerError::Business(e.to_string()))?;

        review(
            &self.deps,
            &trigger.common,
            ContextRequest {
                task_type: TaskType::PlanReview,
                topic: trigger.common.slug.clone(),
                plan_slug: Some(trigger.common.slug.clone()),
                plan_content: Some(plan.clone()),
                scope_patterns: trigger.scope_patterns.clone(),
                ..Default::default()
            },
            trigger.sop_context.as_deref(),
            |sops| self.deps.prompts.plan_review_user(&plan, sops),
            trigger.common.trace(),
        )
        .await
    }
}

/// Reviews task lists against code-scope SOPs
pub struct TaskReviewer {
    deps: LlmDeps,
}

impl TaskReviewer {
    pub fn new(deps: LlmDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl TriggerHandler for TaskReviewer {
    type Trigger = TaskReviewTrigger;

    fn name(&self) -> &'static str {
        "task-reviewer"
    }

    fn machine(&self) -> &'static WorkflowMachine {
        &TASK_REVIEW
    }

    fn completion_phase(&self) -> &'static str {
        "reviewed"
    }

    fn failed_phase(&self) -> &'static str {
        "reviewer_failed"
    }

    async fn run(
        &self,
        trigger: &TaskReviewTrigger,
        _state: Option<&ExecutionState>,
    ) -> Result<StateUpdate, WorkerError> {
        let tasks = serde_json::to_string_pretty(&trigger.tasks).map_err(|e| WorkerError::Business(e.to_string()))?;

        review(
            &self.deps,
            &trigger.common,
            ContextRequest {
                task_type: TaskType::TaskReview,
                topic: trigger.common.slug.clone(),
                plan_slug: Some(trigger.common.slug.clone()),
                scope_patterns: trigger.scope_patterns.clone(),
                ..Default::default()
            },
            trigger.sop_context.as_deref(),
            |sops| self.deps.prompts.task_review_user(&tasks, sops),
            trigger.common.trace(),
        )
        .await
    }
}

/// Reviews developed code against code-scope SOPs
pub struct CodeReviewer {
    deps: LlmDeps,
}

impl CodeReviewer {
    pub fn new(deps: LlmDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl TriggerHandler for CodeReviewer {
    type Trigger = CodeReviewTrigger;

    fn name(&self) -> &'static str {
        "code-reviewer"
    }

    fn machine(&self) -> &'static WorkflowMachine {
        &TASK_EXECUTION
    }

    fn completion_phase(&self) -> &'static str {
        "reviewed"
    }

    fn failed_phase(&self) -> &'static str {
        "reviewer_failed"
    }

    async fn run(
        &self,
        trigger: &CodeReviewTrigger,
        _state: Option<&ExecutionState>,
    ) -> Result<StateUpdate, WorkerError> {
        let deps = &self.deps;
        let context_request = ContextRequest {
            task_type: TaskType::CodeReview,
            topic: trigger.common.slug.clone(),
            plan_slug: Some(trigger.common.slug.clone()),
            files: trigger.files_modified.clone(),
            scope_patterns: trigger.scope_patterns.clone(),
            ..Default::default()
        };

        // The code reviewer needs the diff and tests in front of the
        // model, not just the SOPs.
        let context = deps.build_context(context_request).await?;
        if context.sop_ids.is_empty() && trigger.sop_context.is_none() {
            return Ok(StateUpdate {
                verdict: Some(Verdict::Approved.as_str().to_string()),
                summary: Some(NO_SOPS_NOTE.to_string()),
                findings: Some(serde_json::json!([])),
                formatted_findings: Some(NO_SOPS_NOTE.to_string()),
                ..Default::default()
            });
        }

        let sops = render_sops(&context, trigger.sop_context.as_deref());
        let artifact = format!(
            "Changed files: {}\n\n{}",
            trigger.files_modified.join(", "),
            super::render_context(&context)
        );
        let messages = vec![
            ChatMessage::system(embedded::REVIEWER_SYSTEM),
            ChatMessage::user(deps.prompts.plan_review_user(&artifact, &sops)),
        ];

        let parsed = complete_json::<ReviewOutcome>(
            deps.llm.as_ref(),
            &deps.prompts,
            &deps.capability,
            messages,
            deps.temperature,
            deps.max_tokens,
            trigger.common.trace(),
        )
        .await?;
        deps.record_calls(&trigger.common.execution_id, &parsed);

        let outcome = &parsed.value;
        Ok(StateUpdate {
            verdict: Some(outcome.verdict.as_str().to_string()),
            summary: Some(outcome.summary.clone()),
            findings: Some(serde_json::to_value(&outcome.findings).map_err(|e| WorkerError::Business(e.to_string()))?),
            formatted_findings: Some(format_findings(&outcome.findings)),
            llm_request_ids: parsed.request_ids.clone(),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedLlm;
    use crate::llm::{CallStore, LlmClient};
    use crate::prompts::PromptRegistry;
    use contextbuilder::{CapabilityBudgets, ContextBuilder};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::tempdir;

    fn deps(repo: &std::path::Path, llm: Arc<dyn LlmClient>) -> LlmDeps {
        LlmDeps {
            llm,
            prompts: Arc::new(PromptRegistry::new()),
            context: Arc::new(ContextBuilder::new(repo, None, CapabilityBudgets::new(8000)).unwrap()),
            calls: Arc::new(CallStore::new()),
            capability: "reviewing".to_string(),
            temperature: 0.0,
            max_tokens: 4096,
            context_timeout: Duration::from_secs(5),
            graph_ready: false,
        }
    }

    fn plan_trigger(sop_context: Option<&str>) -> PlanReviewTrigger {
        PlanReviewTrigger {
            common: TriggerCommon {
                execution_id: "exec-1".to_string(),
                slug: "auth".to_string(),
                ..Default::default()
            },
            plan_content: serde_json::json!({"title": "Add auth"}),
            scope_patterns: Vec::new(),
            sop_context: sop_context.map(|s| s.to_string()),
        }
    }

    #[tokio::test]
    async fn test_auto_approve_without_any_sop_context() {
        let temp = tempdir().unwrap();
        let llm = Arc::new(ScriptedLlm::new());
        let reviewer = PlanReviewer::new(deps(temp.path(), llm.clone()));

        let update = reviewer.run(&plan_trigger(None), None).await.unwrap();

        assert_eq!(update.verdict.as_deref(), Some("approved"));
        assert_eq!(update.findings, Some(serde_json::json!([])));
        // The model was never called
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_trigger_sop_context_forces_real_review() {
        let temp = tempdir().unwrap();
        let llm = Arc::new(ScriptedLlm::new().respond(
            r#"{"verdict": "needs_changes", "summary": "gaps", "findings": [
                {"sop_id": "sop/auth", "severity": "error", "status": "violation", "message": "tokens must expire"}
            ]}"#,
        ));
        let reviewer = PlanReviewer::new(deps(temp.path(), llm.clone()));

        let update = reviewer
            .run(&plan_trigger(Some("### sop/auth\n\nTokens must expire.")), None)
            .await
            .unwrap();

        assert_eq!(update.verdict.as_deref(), Some("needs_changes"));
        assert!(update.formatted_findings.unwrap().contains("tokens must expire"));
        assert_eq!(llm.call_count(), 1);

        // The prompt embedded the caller-provided SOP text
        let calls = llm.calls();
        assert!(calls[0].messages[1].content.contains("Tokens must expire."));
    }

    #[tokio::test]
    async fn test_formatted_findings_projection_matches_structured() {
        let temp = tempdir().unwrap();
        let llm = Arc::new(ScriptedLlm::new().respond(
            r#"{"verdict": "needs_changes", "summary": "x", "findings": [
                {"severity": "warning", "status": "suggestion", "message": "name the interface"}
            ]}"#,
        ));
        let reviewer = PlanReviewer::new(deps(temp.path(), llm));

        let update = reviewer
            .run(&plan_trigger(Some("### sop/style\n\nNames matter.")), None)
            .await
            .unwrap();

        let findings = update.findings.unwrap();
        assert_eq!(findings[0]["message"], "name the interface");
        assert!(update.formatted_findings.unwrap().contains("name the interface"));
    }
}
