//! SOP retrieval and matching
//!
//! SOPs live in the graph under the `sop/` id prefix. Matching is pure and
//! operates on already-fetched documents so each strategy can combine the
//! four match modes without extra round-trips.

use std::collections::BTreeSet;
use std::path::Path;

use glob::Pattern;

use crate::error::ContextError;
use crate::graph::{Entity, GraphClient};
use crate::types::{Severity, SopDocument, SopScope};

/// Id prefix for SOP entities in the graph
pub const SOP_PREFIX: &str = "sop/";

/// Keywords shorter than this require an exact match
const KEYWORD_EXACT_LEN: usize = 4;

/// Fetch every SOP document from the graph
pub async fn fetch_all(graph: &GraphClient) -> Result<Vec<SopDocument>, ContextError> {
    let entities = graph.query_entities_by_predicate(SOP_PREFIX).await?;
    Ok(entities.iter().map(from_entity).collect())
}

/// Map an entity's triples onto an [`SopDocument`]
pub fn from_entity(entity: &Entity) -> SopDocument {
    let content = entity.first("sop.content").unwrap_or_default().to_string();
    let tokens = entity
        .first("sop.tokens")
        .and_then(|t| t.parse().ok())
        .unwrap_or_else(|| content.len().div_ceil(4));

    SopDocument {
        id: entity.id.clone(),
        title: entity.first("sop.title").unwrap_or_default().to_string(),
        content,
        applies_to: entity.first("sop.applies-to").unwrap_or_default().to_string(),
        doc_type: entity.first("sop.type").unwrap_or_default().to_string(),
        scope: SopScope::parse(entity.first("sop.scope").unwrap_or_default()),
        severity: Severity::parse(entity.first("sop.severity").unwrap_or_default()),
        domains: entity.all("sop.domain").iter().map(|s| s.to_string()).collect(),
        related_domains: entity
            .all("sop.related-domain")
            .iter()
            .map(|s| s.to_string())
            .collect(),
        keywords: entity.all("sop.keyword").iter().map(|s| s.to_string()).collect(),
        authority: entity.first("sop.authority") == Some("true"),
        tokens,
    }
}

/// SOPs whose `applies_to` glob matches any of the given files.
///
/// The glob is tried against the full path and the basename; universal
/// SOPs (empty glob) always match.
pub fn match_by_patterns<'a>(docs: &'a [SopDocument], files: &[String]) -> Vec<&'a SopDocument> {
    let matched = docs.iter().filter(|doc| {
        if doc.applies_universally() {
            return true;
        }
        let Ok(pattern) = Pattern::new(&doc.applies_to) else {
            return false;
        };
        files.iter().any(|file| {
            pattern.matches(file)
                || Path::new(file)
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|base| pattern.matches(base))
        })
    });
    dedupe_by_id(matched)
}

/// SOPs matching a requested scope, optionally narrowed by glob patterns.
///
/// When patterns are given, a scoped SOP must also plausibly overlap one
/// of them (see [`patterns_overlap`]).
pub fn match_by_scope<'a>(
    docs: &'a [SopDocument],
    scope: SopScope,
    patterns: Option<&[String]>,
) -> Vec<&'a SopDocument> {
    let matched = docs.iter().filter(|doc| {
        if !doc.scope.matches(scope) {
            return false;
        }
        match patterns {
            None => true,
            Some(p) if p.is_empty() => true,
            Some(p) => {
                doc.applies_universally() || p.iter().any(|pattern| patterns_overlap(&doc.applies_to, pattern))
            }
        }
    });
    dedupe_by_id(matched)
}

/// SOPs whose domains intersect the requested direct or related domains
pub fn match_by_domains<'a>(
    docs: &'a [SopDocument],
    domains: &[String],
    related: &[String],
) -> Vec<&'a SopDocument> {
    let matched = docs.iter().filter(|doc| {
        doc.domains.iter().any(|d| domains.contains(d) || related.contains(d))
            || doc.related_domains.iter().any(|d| domains.contains(d))
    });
    dedupe_by_id(matched)
}

/// SOPs with a keyword matching any word of the given text
pub fn match_by_keywords<'a>(docs: &'a [SopDocument], text: &str) -> Vec<&'a SopDocument> {
    let words: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric() && c != '-' && c != '_')
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect();

    let matched = docs.iter().filter(|doc| {
        doc.keywords
            .iter()
            .any(|k| words.iter().any(|w| keywords_match(k, w)))
    });
    dedupe_by_id(matched)
}

/// Length-aware keyword comparison.
///
/// Short keywords (under 4 characters) must match exactly; longer ones
/// allow a substring in either direction. This keeps "go" from matching
/// "mongo" while still letting "auth" match "authentication".
pub fn keywords_match(a: &str, b: &str) -> bool {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    if a.len().min(b.len()) < KEYWORD_EXACT_LEN {
        a == b
    } else {
        a.contains(&b) || b.contains(&a)
    }
}

/// Conservative heuristic for whether two glob patterns can describe
/// overlapping file sets: literal prefix inclusion plus extension
/// compatibility.
pub fn patterns_overlap(a: &str, b: &str) -> bool {
    let prefix_a = literal_prefix(a);
    let prefix_b = literal_prefix(b);
    if !(prefix_a.starts_with(prefix_b) || prefix_b.starts_with(prefix_a)) {
        return false;
    }

    match (concrete_extension(a), concrete_extension(b)) {
        (Some(ea), Some(eb)) => ea == eb,
        _ => true,
    }
}

/// The literal part of a glob up to its first wildcard
fn literal_prefix(pattern: &str) -> &str {
    let end = pattern.find(['*', '?', '[']).unwrap_or(pattern.len());
    &pattern[..end]
}

/// The extension a glob pins down, when it contains no wildcards
fn concrete_extension(pattern: &str) -> Option<&str> {
    let ext = pattern.rsplit('.').next()?;
    if ext == pattern || ext.contains(['*', '?', '[', '/']) {
        None
    } else {
        Some(ext)
    }
}

/// Drop documents with duplicate ids, keeping first occurrence order
pub fn dedupe_by_id<'a>(docs: impl IntoIterator<Item = &'a SopDocument>) -> Vec<&'a SopDocument> {
    let mut seen = BTreeSet::new();
    docs.into_iter().filter(|d| seen.insert(d.id.clone())).collect()
}
