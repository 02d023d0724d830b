//! Planner worker
//!
//! Generates a Plan from a title, or revises one against reviewer
//! findings. On revision passes the current plan-on-disk goes first in
//! the user prompt, before the findings, so the model sees what it wrote
//! before it sees the complaints.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use contextbuilder::{ContextRequest, TaskType};

use super::triggers::PlanTrigger;
use super::{LlmDeps, render_context};
use crate::llm::ChatMessage;
use crate::prompts::embedded;
use crate::state::{ExecutionState, PLAN_REVIEW, StateUpdate, WorkflowMachine};
use crate::worker::{TriggerHandler, WorkerError, complete_json};

/// The plan document the model produces
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanPayload {
    pub title: String,
    pub summary: String,
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default)]
    pub non_goals: Vec<String>,
    #[serde(default)]
    pub phases: Vec<PlanPhase>,
    #[serde(default)]
    pub risks: Vec<String>,
}

/// One implementation phase of a plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanPhase {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub validation: String,
}

/// Plan generation worker
pub struct Planner {
    deps: LlmDeps,
    plans_dir: PathBuf,
}

impl Planner {
    /// `plans_dir` is where plan documents live on disk
    pub fn new(deps: LlmDeps, plans_dir: impl Into<PathBuf>) -> Self {
        Self {
            deps,
            plans_dir: plans_dir.into(),
        }
    }

    fn plan_path(&self, slug: &str) -> PathBuf {
        self.plans_dir.join(format!("{slug}.json"))
    }

    async fn load_plan_from_disk(&self, slug: &str) -> Option<String> {
        match tokio::fs::read_to_string(self.plan_path(slug)).await {
            Ok(content) => Some(content),
            Err(e) => {
                debug!(slug, error = %e, "no plan on disk");
                None
            }
        }
    }

    async fn write_plan(&self, slug: &str, plan: &PlanPayload) -> Result<(), WorkerError> {
        let path = self.plan_path(slug);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| WorkerError::Business(format!("cannot create plans dir: {e}")))?;
        }
        let content = serde_json::to_string_pretty(plan)
            .map_err(|e| WorkerError::Business(format!("cannot serialize plan: {e}")))?;
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| WorkerError::Business(format!("cannot write plan to {}: {e}", path.display())))
    }
}

#[async_trait]
impl TriggerHandler for Planner {
    type Trigger = PlanTrigger;

    fn name(&self) -> &'static str {
        "planner"
    }

    fn machine(&self) -> &'static WorkflowMachine {
        &PLAN_REVIEW
    }

    fn working_phase(&self) -> Option<&'static str> {
        Some("planning")
    }

    fn completion_phase(&self) -> &'static str {
        "planned"
    }

    fn failed_phase(&self) -> &'static str {
        "generator_failed"
    }

    async fn run(
        &self,
        trigger: &PlanTrigger,
        state: Option<&ExecutionState>,
    ) -> Result<StateUpdate, WorkerError> {
        let context = self
            .deps
            .build_context(ContextRequest {
                task_type: TaskType::Planning,
                topic: trigger.title.clone(),
                plan_slug: Some(trigger.common.slug.clone()),
                ..Default::default()
            })
            .await?;
        let digest = render_context(&context);

        let current_plan = if trigger.iteration > 0 {
            self.load_plan_from_disk(&trigger.common.slug).await
        } else {
            None
        };

        let user = self
            .deps
            .prompts
            .planner_user(&trigger.title, &digest, current_plan.as_deref(), state);
        let messages = vec![ChatMessage::system(embedded::PLANNER_SYSTEM), ChatMessage::user(user)];

        let parsed = complete_json::<PlanPayload>(
            self.deps.llm.as_ref(),
            &self.deps.prompts,
            &self.deps.capability,
            messages,
            self.deps.temperature,
            self.deps.max_tokens,
            trigger.common.trace(),
        )
        .await?;

        self.write_plan(&trigger.common.slug, &parsed.value).await?;
        self.deps.record_calls(&trigger.common.execution_id, &parsed);

        Ok(StateUpdate {
            plan_content: Some(serde_json::to_value(&parsed.value).map_err(|e| WorkerError::Business(e.to_string()))?),
            summary: Some(parsed.value.summary.clone()),
            iteration: Some(trigger.iteration),
            llm_request_ids: parsed.request_ids,
            ..Default::default()
        })
    }
}
