//! Task generator worker
//!
//! Expands an approved Plan into an ordered task list.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use contextbuilder::{ContextRequest, TaskType};

use super::triggers::{TaskGenerateTrigger, TaskSpec};
use super::{LlmDeps, render_context};
use crate::llm::ChatMessage;
use crate::prompts::embedded;
use crate::state::{ExecutionState, StateUpdate, TASK_REVIEW, WorkflowMachine};
use crate::worker::{TriggerHandler, WorkerError, complete_json};

/// The task list the model produces
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskListPayload {
    pub tasks: Vec<TaskSpec>,
}

/// Plan-to-tasks expansion worker
pub struct TaskGenerator {
    deps: LlmDeps,
}

impl TaskGenerator {
    pub fn new(deps: LlmDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl TriggerHandler for TaskGenerator {
    type Trigger = TaskGenerateTrigger;

    fn name(&self) -> &'static str {
        "task-generator"
    }

    fn machine(&self) -> &'static WorkflowMachine {
        &TASK_REVIEW
    }

    fn completion_phase(&self) -> &'static str {
        "expanded"
    }

    fn failed_phase(&self) -> &'static str {
        "generator_failed"
    }

    async fn run(
        &self,
        trigger: &TaskGenerateTrigger,
        _state: Option<&ExecutionState>,
    ) -> Result<StateUpdate, WorkerError> {
        let context = self
            .deps
            .build_context(ContextRequest {
                task_type: TaskType::TaskGeneration,
                topic: trigger.common.slug.clone(),
                plan_slug: Some(trigger.common.slug.clone()),
                ..Default::default()
            })
            .await?;

        let plan =
            serde_json::to_string_pretty(&trigger.plan_content).map_err(|e| WorkerError::Business(e.to_string()))?;
        let user = self.deps.prompts.task_generator_user(&plan, &render_context(&context));
        let messages = vec![
            ChatMessage::system(embedded::TASK_GENERATOR_SYSTEM),
            ChatMessage::user(user),
        ];

        let parsed = complete_json::<TaskListPayload>(
            self.deps.llm.as_ref(),
            &self.deps.prompts,
            &self.deps.capability,
            messages,
            self.deps.temperature,
            self.deps.max_tokens,
            trigger.common.trace(),
        )
        .await?;

        if parsed.value.tasks.is_empty() {
            return Err(WorkerError::Business("model produced an empty task list".to_string()));
        }
        self.deps.record_calls(&trigger.common.execution_id, &parsed);

        Ok(StateUpdate {
            tasks: Some(serde_json::to_value(&parsed.value.tasks).map_err(|e| WorkerError::Business(e.to_string()))?),
            summary: Some(format!("{} tasks generated", parsed.value.tasks.len())),
            llm_request_ids: parsed.request_ids,
            ..Default::default()
        })
    }
}
