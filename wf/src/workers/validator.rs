//! Structural validator worker
//!
//! Runs the pattern-triggered checklist against the modified files and
//! writes the aggregate into state. A required-check failure is still a
//! completed validation (validation_passed = false); only an execution
//! error moves the workflow to validation_error.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{info, warn};

use super::triggers::ValidateTrigger;
use crate::checklist::run_checklist;
use crate::state::{ExecutionState, StateUpdate, TASK_EXECUTION, WorkflowMachine};
use crate::worker::{TriggerHandler, WorkerError};

/// Checklist execution worker
pub struct StructuralValidator {
    repo_root: PathBuf,
    checklist_dir: String,
}

impl StructuralValidator {
    pub fn new(repo_root: impl Into<PathBuf>, checklist_dir: impl Into<String>) -> Self {
        Self {
            repo_root: repo_root.into(),
            checklist_dir: checklist_dir.into(),
        }
    }
}

#[async_trait]
impl TriggerHandler for StructuralValidator {
    type Trigger = ValidateTrigger;

    fn name(&self) -> &'static str {
        "structural-validator"
    }

    fn machine(&self) -> &'static WorkflowMachine {
        &TASK_EXECUTION
    }

    fn completion_phase(&self) -> &'static str {
        "validated"
    }

    fn failed_phase(&self) -> &'static str {
        "validation_error"
    }

    async fn run(
        &self,
        trigger: &ValidateTrigger,
        _state: Option<&ExecutionState>,
    ) -> Result<StateUpdate, WorkerError> {
        if !self.repo_root.is_dir() {
            return Err(WorkerError::Business(format!(
                "repository root {} does not exist",
                self.repo_root.display()
            )));
        }

        let report = run_checklist(&self.repo_root, &self.checklist_dir, &trigger.files_modified).await;

        if let Some(warning) = &report.warning {
            warn!(execution_id = %trigger.common.execution_id, %warning, "validation degraded");
        }
        info!(
            execution_id = %trigger.common.execution_id,
            passed = report.passed,
            checks_run = report.checks_run,
            "validation finished"
        );

        Ok(StateUpdate {
            validation_passed: Some(report.passed),
            checks_run: Some(report.checks_run),
            check_results: Some(
                serde_json::to_value(&report.results).map_err(|e| WorkerError::Business(e.to_string()))?,
            ),
            summary: report.warning.clone(),
            ..Default::default()
        })
    }
}
