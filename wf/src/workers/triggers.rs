//! Trigger payloads for each worker

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::Payload;
use crate::worker::{Trigger, TriggerCommon};

/// Dispatch for the planner: generate or revise a plan
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PlanTrigger {
    #[serde(flatten)]
    pub common: TriggerCommon,

    pub title: String,

    /// 0 on the first pass, incremented on each revision
    pub iteration: u32,
    pub max_iterations: u32,
}

impl Trigger for PlanTrigger {
    fn common(&self) -> &TriggerCommon {
        &self.common
    }
}

impl Payload for PlanTrigger {
    const DOMAIN: &'static str = "workflow";
    const CATEGORY: &'static str = "plan-trigger";
    const VERSION: &'static str = "1";

    fn validate(&self) -> Result<(), String> {
        self.common.validate()?;
        if self.title.is_empty() {
            return Err("title is required".to_string());
        }
        Ok(())
    }
}

/// Dispatch for the plan reviewer
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PlanReviewTrigger {
    #[serde(flatten)]
    pub common: TriggerCommon,

    /// The plan under review, raw JSON
    pub plan_content: Value,

    pub scope_patterns: Vec<String>,

    /// Caller-provided pre-built SOP context, merged when the builder
    /// could not reach the graph
    pub sop_context: Option<String>,
}

impl Trigger for PlanReviewTrigger {
    fn common(&self) -> &TriggerCommon {
        &self.common
    }
}

impl Payload for PlanReviewTrigger {
    const DOMAIN: &'static str = "workflow";
    const CATEGORY: &'static str = "plan-review-trigger";
    const VERSION: &'static str = "1";

    fn validate(&self) -> Result<(), String> {
        self.common.validate()?;
        if self.plan_content.is_null() {
            return Err("plan_content is required".to_string());
        }
        Ok(())
    }
}

/// Dispatch for the task generator: expand an approved plan
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TaskGenerateTrigger {
    #[serde(flatten)]
    pub common: TriggerCommon,

    pub plan_content: Value,
}

impl Trigger for TaskGenerateTrigger {
    fn common(&self) -> &TriggerCommon {
        &self.common
    }
}

impl Payload for TaskGenerateTrigger {
    const DOMAIN: &'static str = "workflow";
    const CATEGORY: &'static str = "task-generate-trigger";
    const VERSION: &'static str = "1";

    fn validate(&self) -> Result<(), String> {
        self.common.validate()?;
        if self.plan_content.is_null() {
            return Err("plan_content is required".to_string());
        }
        Ok(())
    }
}

/// Dispatch for the task reviewer
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TaskReviewTrigger {
    #[serde(flatten)]
    pub common: TriggerCommon,

    /// The task list under review, raw JSON
    pub tasks: Value,

    /// Flows into the context request to narrow the SOP set
    pub scope_patterns: Vec<String>,

    pub sop_context: Option<String>,
}

impl Trigger for TaskReviewTrigger {
    fn common(&self) -> &TriggerCommon {
        &self.common
    }
}

impl Payload for TaskReviewTrigger {
    const DOMAIN: &'static str = "workflow";
    const CATEGORY: &'static str = "task-review-trigger";
    const VERSION: &'static str = "1";

    fn validate(&self) -> Result<(), String> {
        self.common.validate()?;
        if self.tasks.is_null() {
            return Err("tasks is required".to_string());
        }
        Ok(())
    }
}

/// One task handed to the developer
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TaskSpec {
    pub id: String,
    pub title: String,
    pub description: String,
    pub files: Vec<String>,
}

/// Dispatch for the developer: implement one task
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DevelopTrigger {
    #[serde(flatten)]
    pub common: TriggerCommon,

    pub task: TaskSpec,
}

impl Trigger for DevelopTrigger {
    fn common(&self) -> &TriggerCommon {
        &self.common
    }
}

impl Payload for DevelopTrigger {
    const DOMAIN: &'static str = "workflow";
    const CATEGORY: &'static str = "develop-trigger";
    const VERSION: &'static str = "1";

    fn validate(&self) -> Result<(), String> {
        self.common.validate()?;
        if self.task.id.is_empty() {
            return Err("task.id is required".to_string());
        }
        if self.task.title.is_empty() {
            return Err("task.title is required".to_string());
        }
        Ok(())
    }
}

/// Dispatch for the code reviewer in the task-execution loop
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CodeReviewTrigger {
    #[serde(flatten)]
    pub common: TriggerCommon,

    /// Files the developer touched
    pub files_modified: Vec<String>,

    pub scope_patterns: Vec<String>,

    pub sop_context: Option<String>,
}

impl Trigger for CodeReviewTrigger {
    fn common(&self) -> &TriggerCommon {
        &self.common
    }
}

impl Payload for CodeReviewTrigger {
    const DOMAIN: &'static str = "workflow";
    const CATEGORY: &'static str = "code-review-trigger";
    const VERSION: &'static str = "1";

    fn validate(&self) -> Result<(), String> {
        self.common.validate()
    }
}

/// Dispatch for the structural validator
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ValidateTrigger {
    #[serde(flatten)]
    pub common: TriggerCommon,

    /// Files the developer touched; empty means full scan
    pub files_modified: Vec<String>,
}

impl Trigger for ValidateTrigger {
    fn common(&self) -> &TriggerCommon {
        &self.common
    }
}

impl Payload for ValidateTrigger {
    const DOMAIN: &'static str = "workflow";
    const CATEGORY: &'static str = "validate-trigger";
    const VERSION: &'static str = "1";

    fn validate(&self) -> Result<(), String> {
        self.common.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Envelope;

    fn common() -> TriggerCommon {
        TriggerCommon {
            execution_id: "exec-1".to_string(),
            slug: "auth".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_plan_trigger_round_trip() {
        let trigger = PlanTrigger {
            common: common(),
            title: "Add auth".to_string(),
            iteration: 0,
            max_iterations: 3,
        };
        let envelope = Envelope::new("test", &trigger).unwrap();
        let back: PlanTrigger = envelope.decode().unwrap();
        assert_eq!(back.title, "Add auth");
        assert_eq!(back.common.execution_id, "exec-1");
    }

    #[test]
    fn test_common_fields_flatten() {
        let trigger = PlanTrigger {
            common: common(),
            title: "Add auth".to_string(),
            ..Default::default()
        };
        let value = serde_json::to_value(&trigger).unwrap();
        // execution_id sits at the top level, not nested under "common"
        assert_eq!(value["execution_id"], "exec-1");
        assert!(value.get("common").is_none());
    }

    #[test]
    fn test_validation_rejects_missing_title() {
        let trigger = PlanTrigger {
            common: common(),
            ..Default::default()
        };
        assert!(trigger.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_null_plan() {
        let trigger = PlanReviewTrigger {
            common: common(),
            ..Default::default()
        };
        assert!(trigger.validate().is_err());
    }

    #[test]
    fn test_validate_trigger_allows_empty_files() {
        let trigger = ValidateTrigger {
            common: common(),
            files_modified: Vec::new(),
        };
        assert!(trigger.validate().is_ok());
    }
}
