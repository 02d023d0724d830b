//! Developer worker
//!
//! Implements one task: the model produces complete file contents and
//! the worker writes them through containment-validated paths, reporting
//! the modified files back into state.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use contextbuilder::{ContextRequest, FileGatherer, TaskType};

use super::triggers::DevelopTrigger;
use super::{LlmDeps, render_context};
use crate::llm::ChatMessage;
use crate::prompts::embedded;
use crate::state::{ExecutionState, StateUpdate, TASK_EXECUTION, WorkflowMachine};
use crate::worker::{TriggerHandler, WorkerError, complete_json};

/// One file the model wants written
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub content: String,
}

/// Parsed developer output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeveloperOutcome {
    #[serde(default)]
    pub summary: String,
    pub files: Vec<FileChange>,
}

/// Task implementation worker
pub struct Developer {
    deps: LlmDeps,
    files: FileGatherer,
}

impl Developer {
    pub fn new(deps: LlmDeps, repo_root: impl AsRef<Path>) -> Result<Self, contextbuilder::ContextError> {
        Ok(Self {
            deps,
            files: FileGatherer::new(repo_root.as_ref())?,
        })
    }

    /// Write a change through path validation
    async fn write_change(&self, change: &FileChange) -> Result<(), WorkerError> {
        let resolved = self
            .files
            .resolve(Path::new(&change.path))
            .map_err(|e| WorkerError::Business(e.to_string()))?;

        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| WorkerError::Business(format!("cannot create {}: {e}", parent.display())))?;
        }
        tokio::fs::write(&resolved, &change.content)
            .await
            .map_err(|e| WorkerError::Business(format!("cannot write {}: {e}", resolved.display())))
    }
}

#[async_trait]
impl TriggerHandler for Developer {
    type Trigger = DevelopTrigger;

    fn name(&self) -> &'static str {
        "developer"
    }

    fn machine(&self) -> &'static WorkflowMachine {
        &TASK_EXECUTION
    }

    fn completion_phase(&self) -> &'static str {
        "developed"
    }

    fn failed_phase(&self) -> &'static str {
        "developer_failed"
    }

    async fn run(
        &self,
        trigger: &DevelopTrigger,
        _state: Option<&ExecutionState>,
    ) -> Result<StateUpdate, WorkerError> {
        let task = &trigger.task;
        let context = self
            .deps
            .build_context(ContextRequest {
                task_type: TaskType::Development,
                topic: task.title.clone(),
                plan_slug: Some(trigger.common.slug.clone()),
                files: task.files.clone(),
                ..Default::default()
            })
            .await?;

        let user = self.deps.prompts.developer_user(
            &task.title,
            &task.description,
            &task.files.join(", "),
            &render_context(&context),
        );
        let messages = vec![ChatMessage::system(embedded::DEVELOPER_SYSTEM), ChatMessage::user(user)];

        let parsed = complete_json::<DeveloperOutcome>(
            self.deps.llm.as_ref(),
            &self.deps.prompts,
            &self.deps.capability,
            messages,
            self.deps.temperature,
            self.deps.max_tokens,
            trigger.common.trace(),
        )
        .await?;

        if parsed.value.files.is_empty() {
            return Err(WorkerError::Business("model produced no file changes".to_string()));
        }

        // Validate every path before touching the tree
        for change in &parsed.value.files {
            self.files
                .resolve(Path::new(&change.path))
                .map_err(|e| WorkerError::Business(e.to_string()))?;
        }
        for change in &parsed.value.files {
            self.write_change(change).await?;
        }
        self.deps.record_calls(&trigger.common.execution_id, &parsed);

        let files_modified: Vec<String> = parsed.value.files.iter().map(|f| f.path.clone()).collect();
        info!(task = %task.id, files = files_modified.len(), "task implemented");

        Ok(StateUpdate {
            files_modified: Some(files_modified),
            summary: Some(parsed.value.summary.clone()),
            llm_request_ids: parsed.request_ids,
            ..Default::default()
        })
    }
}
