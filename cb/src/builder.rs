//! Context bundle assembly
//!
//! The builder owns the gatherers and a capability→budget table, executes
//! the strategy for a request's task type, and always returns a response:
//! build failures are reported through the response's `error` field so
//! callers can decide what a missing bundle means for them.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::budget::{
    MIN_TOKENS_FOR_CONVENTIONS, MIN_TOKENS_FOR_PATTERNS, MIN_TOKENS_FOR_TESTS, TokenBudget, TokenEstimator,
};
use crate::error::ContextError;
use crate::file::FileGatherer;
use crate::git::{GitGatherer, truncate_diff_by_files};
use crate::graph::GraphClient;
use crate::sop;
use crate::strategy::{CONVENTION_CANDIDATES, GatherStep, order_for, select_sops};
use crate::types::{ContextRequest, ContextResponse, EntityRef};

/// Default token budget when a capability has no explicit entry
pub const DEFAULT_TOKEN_BUDGET: usize = 16_000;

/// How many tree entries a summary includes at most
const TREE_SUMMARY_LIMIT: usize = 200;

/// Token budgets per capability label
#[derive(Debug, Clone, Default)]
pub struct CapabilityBudgets {
    default_tokens: usize,
    per_capability: HashMap<String, usize>,
}

impl CapabilityBudgets {
    pub fn new(default_tokens: usize) -> Self {
        Self {
            default_tokens,
            per_capability: HashMap::new(),
        }
    }

    pub fn with_capability(mut self, capability: impl Into<String>, tokens: usize) -> Self {
        self.per_capability.insert(capability.into(), tokens);
        self
    }

    pub fn for_capability(&self, capability: Option<&str>) -> usize {
        capability
            .and_then(|c| self.per_capability.get(c).copied())
            .unwrap_or(self.default_tokens)
    }
}

/// Assembles LLM-ready context bundles under a token budget
pub struct ContextBuilder {
    files: FileGatherer,
    git: GitGatherer,
    graph: Option<GraphClient>,
    budgets: CapabilityBudgets,
    estimator: TokenEstimator,
}

impl ContextBuilder {
    pub fn new(
        repo_root: impl Into<std::path::PathBuf>,
        graph: Option<GraphClient>,
        budgets: CapabilityBudgets,
    ) -> Result<Self, ContextError> {
        let root = repo_root.into();
        Ok(Self {
            files: FileGatherer::new(&root)?,
            git: GitGatherer::new(root),
            graph,
            budgets,
            estimator: TokenEstimator,
        })
    }

    pub fn files(&self) -> &FileGatherer {
        &self.files
    }

    pub fn git(&self) -> &GitGatherer {
        &self.git
    }

    /// Build a context bundle for a request.
    ///
    /// Never returns `Err`; failures land in the response's `error` field
    /// with nothing allocated.
    pub async fn build(&self, request: &ContextRequest) -> ContextResponse {
        let total = self.budgets.for_capability(request.capability.as_deref());
        let mut budget = TokenBudget::new(total);
        let mut response = ContextResponse::default();

        let changed = self.changed_files(request).await;
        response.domains = FileGatherer::infer_domains(&changed);

        for step in order_for(request.task_type) {
            let result = match step {
                GatherStep::Sops => self.gather_sops(request, &changed, &mut budget, &mut response).await,
                GatherStep::Diff => self.gather_diff(request, &mut budget, &mut response).await,
                GatherStep::TestFiles => self.gather_test_files(&changed, &mut budget, &mut response).await,
                GatherStep::Conventions => self.gather_conventions(&mut budget, &mut response).await,
                GatherStep::Decisions => self.gather_decisions(request, &mut budget, &mut response).await,
                GatherStep::Tree => self.gather_tree(&mut budget, &mut response),
            };

            if let Err(e) = result {
                // All-or-nothing steps abort the whole build
                warn!(task_type = %request.task_type, error = %e, "context build failed");
                return ContextResponse {
                    domains: response.domains,
                    error: Some(e.to_string()),
                    ..Default::default()
                };
            }
        }

        response.tokens_used = budget.allocated();
        info!(
            task_type = %request.task_type,
            tokens_used = response.tokens_used,
            total,
            sops = response.sop_ids.len(),
            documents = response.documents.len(),
            truncated = response.truncated,
            "context bundle assembled"
        );
        response
    }

    /// Changed files: the request's list when given, otherwise git
    async fn changed_files(&self, request: &ContextRequest) -> Vec<String> {
        if !request.files.is_empty() {
            return request.files.clone();
        }
        match self.git.changed_files(request.git_ref.as_deref()).await {
            Ok(files) => files,
            Err(e) => {
                debug!(error = %e, "could not list changed files");
                Vec::new()
            }
        }
    }

    /// SOP bundle, all-or-nothing: either every selected SOP fits or the
    /// build fails with a budget error.
    async fn gather_sops(
        &self,
        request: &ContextRequest,
        changed: &[String],
        budget: &mut TokenBudget,
        response: &mut ContextResponse,
    ) -> Result<(), ContextError> {
        let Some(graph) = &self.graph else {
            debug!("no graph gateway configured, skipping SOPs");
            return Ok(());
        };
        if !request.graph_ready {
            debug!("graph not ready, skipping SOPs");
            return Ok(());
        }

        let docs = match sop::fetch_all(graph).await {
            Ok(docs) => docs,
            Err(e) => {
                // Graph trouble degrades to an SOP-free bundle, it never
                // fails the build.
                warn!(error = %e, "graph unreachable, skipping SOPs");
                return Ok(());
            }
        };

        self.apply_sops(&docs, request, changed, budget, response)
    }

    /// Select and allocate the SOP bundle. Either every selected SOP fits
    /// or this fails without allocating anything.
    fn apply_sops(
        &self,
        docs: &[crate::types::SopDocument],
        request: &ContextRequest,
        changed: &[String],
        budget: &mut TokenBudget,
        response: &mut ContextResponse,
    ) -> Result<(), ContextError> {
        let bundle = select_sops(docs, request, changed, &response.domains);
        if bundle.is_empty() {
            return Ok(());
        }

        let needed: usize = bundle.iter().map(|d| d.tokens).sum();
        budget.allocate("sops", needed)?;

        for doc in bundle {
            response.sop_ids.push(doc.id.clone());
            response.entities.push(EntityRef {
                id: doc.id.clone(),
                entity_type: "sop".to_string(),
                tokens: doc.tokens,
            });
            response
                .documents
                .insert(format!("sops/{}.md", doc.id.trim_start_matches(sop::SOP_PREFIX)), doc.content.clone());
        }
        Ok(())
    }

    /// Git diff: whole when it fits, otherwise truncated at file boundaries
    async fn gather_diff(
        &self,
        request: &ContextRequest,
        budget: &mut TokenBudget,
        response: &mut ContextResponse,
    ) -> Result<(), ContextError> {
        let diff = match self.git.diff(request.git_ref.as_deref(), &request.files).await {
            Ok(d) => d,
            Err(e) => {
                debug!(error = %e, "diff unavailable");
                return Ok(());
            }
        };
        if diff.is_empty() {
            return Ok(());
        }

        let tokens = self.estimator.estimate(&diff);
        if budget.can_fit(tokens) {
            budget.try_allocate("diff", tokens);
            response.diffs = diff;
        } else {
            let granted = budget.try_allocate("diff", budget.remaining());
            response.diffs = truncate_diff_by_files(&diff, self.estimator.to_bytes(granted));
            response.truncated = true;
        }
        Ok(())
    }

    /// Test files related to the changed sources, greedy partial fill
    async fn gather_test_files(
        &self,
        changed: &[String],
        budget: &mut TokenBudget,
        response: &mut ContextResponse,
    ) -> Result<(), ContextError> {
        if budget.remaining() < MIN_TOKENS_FOR_TESTS {
            return Ok(());
        }

        let tests = self.files.find_test_files(changed);
        if tests.is_empty() {
            return Ok(());
        }

        let (docs, truncated) = self.files.read_files_partial(&tests, budget, &self.estimator).await;
        response.truncated |= truncated;
        response.documents.extend(docs);
        Ok(())
    }

    /// Convention documents from the fixed candidate list
    async fn gather_conventions(
        &self,
        budget: &mut TokenBudget,
        response: &mut ContextResponse,
    ) -> Result<(), ContextError> {
        if budget.remaining() < MIN_TOKENS_FOR_CONVENTIONS {
            return Ok(());
        }

        for candidate in CONVENTION_CANDIDATES {
            let Ok(content) = self.files.read_file(candidate).await else {
                continue;
            };
            let tokens = self.estimator.estimate(&content);
            if !budget.can_fit(tokens) {
                break;
            }
            budget.try_allocate(format!("conventions:{candidate}"), tokens);
            response.documents.insert((*candidate).to_string(), content);
        }
        Ok(())
    }

    /// Recent engineering decisions rendered as one markdown document
    async fn gather_decisions(
        &self,
        request: &ContextRequest,
        budget: &mut TokenBudget,
        response: &mut ContextResponse,
    ) -> Result<(), ContextError> {
        let Some(graph) = &self.graph else {
            return Ok(());
        };
        let (Some(slug), true) = (request.plan_slug.as_deref(), request.graph_ready) else {
            return Ok(());
        };

        let decisions = match graph.decisions_for_project(slug).await {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "graph unreachable, skipping decisions");
                return Ok(());
            }
        };
        if decisions.is_empty() {
            return Ok(());
        }

        let mut doc = String::from("# Recent decisions\n\n");
        for d in &decisions {
            doc.push_str(&format!("- [{}] {} ({} on {})\n", d.kind, d.message, d.agent, d.branch));
        }

        let tokens = self.estimator.estimate(&doc);
        if budget.can_fit(tokens) {
            budget.try_allocate("decisions", tokens);
            for d in &decisions {
                response.entities.push(EntityRef {
                    id: d.id.clone(),
                    entity_type: "decision".to_string(),
                    tokens: 0,
                });
            }
            response.documents.insert("decisions.md".to_string(), doc);
        }
        Ok(())
    }

    /// Repository tree summary, capped
    fn gather_tree(&self, budget: &mut TokenBudget, response: &mut ContextResponse) -> Result<(), ContextError> {
        if budget.remaining() < MIN_TOKENS_FOR_PATTERNS {
            return Ok(());
        }

        let files = self.files.list_recursive();
        let mut summary = String::from("# Repository files\n\n");
        for f in files.iter().take(TREE_SUMMARY_LIMIT) {
            summary.push_str(f);
            summary.push('\n');
        }
        if files.len() > TREE_SUMMARY_LIMIT {
            summary.push_str(&format!("... and {} more\n", files.len() - TREE_SUMMARY_LIMIT));
        }

        let tokens = self.estimator.estimate(&summary);
        if budget.can_fit(tokens) {
            budget.try_allocate("tree", tokens);
            response.documents.insert("file-tree.md".to_string(), summary);
        }
        Ok(())
    }
}
