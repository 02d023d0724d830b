//! Gathering strategies
//!
//! A strategy is a fixed, ordered list of gather steps per task type. The
//! builder executes the steps in order against one shared budget; each
//! step decides internally whether it fits.

use crate::file::FileGatherer;
use crate::types::{SopDocument, SopScope, TaskType};
use crate::{sop, types::ContextRequest};

/// One step of a gathering strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatherStep {
    /// SOP bundle, all-or-nothing
    Sops,
    /// Git diff, whole or truncated at file boundaries
    Diff,
    /// Test files related to the changed sources
    TestFiles,
    /// Convention documents from the fixed candidate list
    Conventions,
    /// Recent engineering decisions from the graph
    Decisions,
    /// Repository tree summary
    Tree,
}

/// Canonical review ordering: SOPs gate everything, then diff, then tests,
/// then conventions with whatever is left.
pub const REVIEW_ORDER: &[GatherStep] = &[
    GatherStep::Sops,
    GatherStep::Diff,
    GatherStep::TestFiles,
    GatherStep::Conventions,
];

/// Planning leans on plan-scope SOPs and history instead of diffs
pub const PLANNING_ORDER: &[GatherStep] = &[
    GatherStep::Sops,
    GatherStep::Decisions,
    GatherStep::Conventions,
    GatherStep::Tree,
];

/// Development gets the diff and tests but no SOP gate
pub const DEVELOPMENT_ORDER: &[GatherStep] = &[
    GatherStep::Diff,
    GatherStep::TestFiles,
    GatherStep::Conventions,
];

/// Convention file candidates, walked in order until the budget runs out
pub const CONVENTION_CANDIDATES: &[&str] = &[
    "CONVENTIONS.md",
    "STYLE.md",
    "CONTRIBUTING.md",
    ".github/CONTRIBUTING.md",
    "docs/conventions.md",
    "docs/style-guide.md",
];

/// The step ordering for a task type
pub fn order_for(task_type: TaskType) -> &'static [GatherStep] {
    match task_type {
        TaskType::Planning | TaskType::TaskGeneration => PLANNING_ORDER,
        TaskType::Development => DEVELOPMENT_ORDER,
        TaskType::PlanReview | TaskType::TaskReview | TaskType::CodeReview => REVIEW_ORDER,
    }
}

/// Select the SOP bundle for a request: pattern-matched ∪ domain-matched ∪
/// related-domain matched ∪ scope-matched, deduplicated by id.
pub fn select_sops<'a>(
    docs: &'a [SopDocument],
    request: &ContextRequest,
    changed_files: &[String],
    domains: &[String],
) -> Vec<&'a SopDocument> {
    let related = FileGatherer::expand_related_domains(domains);
    let scope = request.task_type.sop_scope();

    let mut bundle = Vec::new();
    bundle.extend(sop::match_by_patterns(docs, changed_files));
    bundle.extend(sop::match_by_domains(docs, domains, &related));
    if !request.scope_patterns.is_empty() || scope != SopScope::Code {
        bundle.extend(sop::match_by_scope(docs, scope, Some(request.scope_patterns.as_slice())));
    }
    if !request.topic.is_empty() {
        bundle.extend(sop::match_by_keywords(docs, &request.topic));
    }

    sop::dedupe_by_id(bundle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_review_order_is_canonical() {
        assert_eq!(REVIEW_ORDER[0], GatherStep::Sops);
        assert_eq!(REVIEW_ORDER[1], GatherStep::Diff);
        assert_eq!(REVIEW_ORDER[2], GatherStep::TestFiles);
        assert_eq!(REVIEW_ORDER[3], GatherStep::Conventions);
    }

    #[test]
    fn test_order_for() {
        assert_eq!(order_for(TaskType::CodeReview), REVIEW_ORDER);
        assert_eq!(order_for(TaskType::PlanReview), REVIEW_ORDER);
        assert_eq!(order_for(TaskType::Planning), PLANNING_ORDER);
        assert_eq!(order_for(TaskType::Development), DEVELOPMENT_ORDER);
    }

    #[test]
    fn test_select_sops_dedupes_across_modes() {
        // One SOP matching by pattern AND by domain must appear once
        let mut d = SopDocument {
            id: "sop/auth".to_string(),
            applies_to: "*.go".to_string(),
            ..Default::default()
        };
        d.domains = vec!["auth".to_string()];
        let docs = vec![d];

        let request = ContextRequest {
            task_type: TaskType::CodeReview,
            ..Default::default()
        };
        let files = vec!["internal/auth/token.go".to_string()];
        let domains = vec!["auth".to_string()];

        let bundle = select_sops(&docs, &request, &files, &domains);
        assert_eq!(bundle.len(), 1);
    }

    #[test]
    fn test_select_sops_scope_patterns_change_bundle() {
        let api = SopDocument {
            id: "sop/api".to_string(),
            applies_to: "api/**/*.go".to_string(),
            scope: SopScope::Code,
            ..Default::default()
        };
        let web = SopDocument {
            id: "sop/web".to_string(),
            applies_to: "web/**/*.ts".to_string(),
            scope: SopScope::Code,
            ..Default::default()
        };
        let docs = vec![api, web];

        let mut request = ContextRequest {
            task_type: TaskType::TaskReview,
            ..Default::default()
        };

        request.scope_patterns = vec!["api/*.go".to_string()];
        let with_api = select_sops(&docs, &request, &[], &[]);

        request.scope_patterns = vec!["web/*.ts".to_string()];
        let with_web = select_sops(&docs, &request, &[], &[]);

        let ids = |b: &[&SopDocument]| b.iter().map(|d| d.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&with_api), vec!["sop/api"]);
        assert_eq!(ids(&with_web), vec!["sop/web"]);
    }
}
