//! Subject naming and wildcard matching

/// Trigger subject for a worker: `workflow.trigger.<worker>`
pub fn trigger_subject(worker: &str) -> String {
    format!("workflow.trigger.{worker}")
}

/// Async-step trigger subject: `workflow.async.<worker>`
pub fn async_subject(worker: &str) -> String {
    format!("workflow.async.{worker}")
}

/// Result subject: `<prefix>.<worker>.<slug>`
pub fn result_subject(prefix: &str, worker: &str, slug: &str) -> String {
    format!("{prefix}.{worker}.{slug}")
}

/// Callback subject: `workflow.step-callback.<execution_id>.<task_id>`
pub fn callback_subject(execution_id: &str, task_id: &str) -> String {
    format!("workflow.step-callback.{execution_id}.{task_id}")
}

/// Match a subject against a filter with NATS-style wildcards:
/// `*` matches one token, `>` matches the rest.
pub fn subject_matches(filter: &str, subject: &str) -> bool {
    let mut filter_tokens = filter.split('.');
    let mut subject_tokens = subject.split('.');

    loop {
        match (filter_tokens.next(), subject_tokens.next()) {
            // ">" requires at least one remaining token
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => continue,
            (Some(f), Some(s)) if f == s => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_builders() {
        assert_eq!(trigger_subject("planner"), "workflow.trigger.planner");
        assert_eq!(async_subject("developer"), "workflow.async.developer");
        assert_eq!(
            result_subject("workflow.result", "planner", "auth-plan"),
            "workflow.result.planner.auth-plan"
        );
        assert_eq!(
            callback_subject("exec-1", "task-2"),
            "workflow.step-callback.exec-1.task-2"
        );
    }

    #[test]
    fn test_subject_matches_exact() {
        assert!(subject_matches("workflow.trigger.planner", "workflow.trigger.planner"));
        assert!(!subject_matches("workflow.trigger.planner", "workflow.trigger.reviewer"));
        assert!(!subject_matches("workflow.trigger.planner", "workflow.trigger"));
    }

    #[test]
    fn test_subject_matches_wildcards() {
        assert!(subject_matches("workflow.trigger.*", "workflow.trigger.planner"));
        assert!(!subject_matches("workflow.trigger.*", "workflow.trigger.planner.extra"));
        assert!(subject_matches("workflow.>", "workflow.trigger.planner.extra"));
        assert!(!subject_matches("workflow.>", "workflow"));
    }
}
