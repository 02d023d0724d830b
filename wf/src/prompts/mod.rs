//! Prompt rendering
//!
//! Templates are embedded and registered once into a Handlebars registry.

pub mod embedded;

use handlebars::Handlebars;
use serde_json::json;

use crate::state::ExecutionState;

/// Renders the embedded prompt templates
pub struct PromptRegistry {
    handlebars: Handlebars<'static>,
}

impl Default for PromptRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptRegistry {
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();
        handlebars.register_escape_fn(handlebars::no_escape);

        for (name, template) in [
            ("planner-user", embedded::PLANNER_USER),
            ("planner-revision-user", embedded::PLANNER_REVISION_USER),
            ("plan-review-user", embedded::PLAN_REVIEW_USER),
            ("task-review-user", embedded::TASK_REVIEW_USER),
            ("task-generator-user", embedded::TASK_GENERATOR_USER),
            ("developer-user", embedded::DEVELOPER_USER),
            ("format-correction", embedded::FORMAT_CORRECTION),
        ] {
            handlebars
                .register_template_string(name, template)
                .expect("embedded template is valid");
        }

        Self { handlebars }
    }

    fn render(&self, name: &str, data: &serde_json::Value) -> String {
        self.handlebars
            .render(name, data)
            .unwrap_or_else(|e| format!("template {name} failed to render: {e}"))
    }

    /// Planner prompt. Revision passes put the current plan first, then
    /// the reviewer's findings; the initial pass just uses the title.
    pub fn planner_user(
        &self,
        title: &str,
        context: &str,
        current_plan: Option<&str>,
        state: Option<&ExecutionState>,
    ) -> String {
        match current_plan {
            Some(plan) => {
                let findings = state
                    .and_then(|s| s.formatted_findings.as_deref())
                    .unwrap_or("No findings were recorded.");
                self.render(
                    "planner-revision-user",
                    &json!({
                        "title": title,
                        "iteration": state.map(|s| s.iteration).unwrap_or(0),
                        "current_plan": plan,
                        "findings": findings,
                        "context": context,
                    }),
                )
            }
            None => self.render("planner-user", &json!({ "title": title, "context": context })),
        }
    }

    pub fn plan_review_user(&self, plan: &str, sops: &str) -> String {
        self.render("plan-review-user", &json!({ "plan": plan, "sops": sops }))
    }

    pub fn task_review_user(&self, tasks: &str, sops: &str) -> String {
        self.render("task-review-user", &json!({ "tasks": tasks, "sops": sops }))
    }

    pub fn task_generator_user(&self, plan: &str, context: &str) -> String {
        self.render("task-generator-user", &json!({ "plan": plan, "context": context }))
    }

    pub fn developer_user(&self, task_title: &str, task_description: &str, files: &str, context: &str) -> String {
        self.render(
            "developer-user",
            &json!({
                "task_title": task_title,
                "task_description": task_description,
                "files": files,
                "context": context,
            }),
        )
    }

    pub fn format_correction(&self, reason: &str) -> String {
        self.render("format-correction", &json!({ "reason": reason }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_planner_initial_pass() {
        let prompts = PromptRegistry::new();
        let out = prompts.planner_user("Add auth", "repo stuff", None, None);
        assert!(out.contains("Add auth"));
        assert!(out.contains("repo stuff"));
        assert!(!out.contains("previously wrote"));
    }

    #[test]
    fn test_planner_revision_puts_plan_before_findings() {
        let prompts = PromptRegistry::new();
        let mut state = ExecutionState::new("exec-1", "plan-review", "generating", "auth", "Add auth");
        state.iteration = 1;
        state.formatted_findings = Some("## error\n- tokens must expire".to_string());

        let out = prompts.planner_user("Add auth", "", Some("{\"title\":\"old plan\"}"), Some(&state));

        let plan_pos = out.find("old plan").unwrap();
        let findings_pos = out.find("tokens must expire").unwrap();
        assert!(plan_pos < findings_pos, "plan must precede findings");
    }

    #[test]
    fn test_format_correction_embeds_reason() {
        let prompts = PromptRegistry::new();
        let out = prompts.format_correction("expected value at line 1");
        assert!(out.contains("expected value at line 1"));
    }

    #[test]
    fn test_context_section_omitted_when_empty() {
        let prompts = PromptRegistry::new();
        let out = prompts.planner_user("Add auth", "", None, None);
        assert!(!out.contains("# Repository context"));
    }
}
