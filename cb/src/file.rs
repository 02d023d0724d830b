//! Repository file gathering
//!
//! All reads go through containment validation: a path must resolve inside
//! the repository root both before and after symlink resolution.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::budget::{MIN_TOKENS_FOR_PARTIAL, TokenBudget, TokenEstimator};
use crate::error::ContextError;

/// Directories never worth walking for source context
pub const SKIP_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "vendor",
    "target",
    "dist",
    "build",
    ".idea",
    ".vscode",
    "__pycache__",
    ".venv",
    ".next",
    ".cache",
];

/// Marker appended when a partial file read hits the budget
pub const PARTIAL_TRUNCATION_MARKER: &str = "...[truncated]";

/// Substring table mapping path fragments onto semantic domains.
///
/// Matching is case-insensitive against the whole relative path.
const DOMAIN_PATTERNS: &[(&str, &str)] = &[
    ("auth", "auth"),
    ("security", "security"),
    ("crypt", "security"),
    ("secret", "security"),
    ("database", "database"),
    ("db/", "database"),
    ("migration", "database"),
    ("sql", "database"),
    ("api", "api"),
    ("handler", "api"),
    ("endpoint", "api"),
    ("route", "api"),
    ("queue", "messaging"),
    ("broker", "messaging"),
    ("pubsub", "messaging"),
    ("nats", "messaging"),
    ("kafka", "messaging"),
    ("test", "testing"),
    ("log", "logging"),
    ("deploy", "deployment"),
    ("docker", "deployment"),
    ("k8s", "deployment"),
    ("kubernetes", "deployment"),
    ("helm", "deployment"),
    ("config", "config"),
    ("settings", "config"),
    ("perf", "performance"),
    ("benchmark", "performance"),
    ("cache", "performance"),
    ("error", "error-handling"),
    ("valid", "validation"),
    ("sanitiz", "validation"),
];

/// Canonical neighbour sets for domain expansion
const RELATED_DOMAINS: &[(&str, &[&str])] = &[
    ("auth", &["security", "validation"]),
    ("security", &["auth", "validation"]),
    ("database", &["performance", "api"]),
    ("api", &["auth", "validation", "error-handling"]),
    ("messaging", &["error-handling", "performance"]),
    ("testing", &["validation"]),
    ("logging", &["error-handling"]),
    ("deployment", &["config", "security"]),
    ("config", &["deployment", "security"]),
    ("performance", &["database"]),
    ("error-handling", &["logging", "validation"]),
    ("validation", &["security", "error-handling"]),
];

/// Reads repository files with containment checks
#[derive(Debug, Clone)]
pub struct FileGatherer {
    root: PathBuf,
}

impl FileGatherer {
    /// Create a gatherer rooted at a repository
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, ContextError> {
        let root: PathBuf = root.into();
        let root = root.canonicalize().map_err(|source| ContextError::Io {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a repository-relative path, rejecting traversal and
    /// symlink escape.
    ///
    /// The lexical form is checked before symlink resolution and the real
    /// path is checked after it; both must stay inside the root.
    pub fn resolve(&self, path: &Path) -> Result<PathBuf, ContextError> {
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };

        // Lexical containment first: no parent-dir components allowed to
        // climb above the root.
        let mut depth: i64 = 0;
        for component in path.components() {
            match component {
                Component::ParentDir => depth -= 1,
                Component::Normal(_) => depth += 1,
                _ => {}
            }
            if depth < 0 {
                return Err(ContextError::OutsideRepository {
                    path: path.to_path_buf(),
                    root: self.root.clone(),
                });
            }
        }

        // Then resolve symlinks. Non-existent paths resolve through their
        // nearest existing parent so new files can still be validated.
        let real = if joined.exists() {
            joined.canonicalize().unwrap_or_else(|_| joined.clone())
        } else if let Some(parent) = joined.parent() {
            let parent_real = parent.canonicalize().unwrap_or_else(|_| parent.to_path_buf());
            parent_real.join(joined.file_name().unwrap_or_default())
        } else {
            joined.clone()
        };

        if real.starts_with(&self.root) {
            Ok(real)
        } else {
            Err(ContextError::OutsideRepository {
                path: path.to_path_buf(),
                root: self.root.clone(),
            })
        }
    }

    /// Read one file's contents
    pub async fn read_file(&self, path: &str) -> Result<String, ContextError> {
        let resolved = self.resolve(Path::new(path))?;
        tokio::fs::read_to_string(&resolved)
            .await
            .map_err(|source| ContextError::Io { path: resolved, source })
    }

    /// Walk the repository tree, skipping non-source directories.
    ///
    /// Returns sorted repository-relative paths.
    pub fn list_recursive(&self) -> Vec<String> {
        let mut files = Vec::new();
        let walker = WalkDir::new(&self.root).into_iter().filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            !(entry.file_type().is_dir() && SKIP_DIRS.contains(&name.as_ref()))
        });

        for entry in walker.flatten() {
            if !entry.file_type().is_file() {
                continue;
            }
            if let Ok(rel) = entry.path().strip_prefix(&self.root) {
                files.push(rel.to_string_lossy().to_string());
            }
        }

        files.sort();
        files
    }

    /// Generate per-language test-file candidates for the given sources and
    /// return the ones that exist on disk.
    pub fn find_test_files(&self, sources: &[String]) -> Vec<String> {
        let mut candidates = BTreeSet::new();

        for source in sources {
            let path = Path::new(source);
            let (Some(stem), Some(ext)) = (
                path.file_stem().and_then(|s| s.to_str()),
                path.extension().and_then(|s| s.to_str()),
            ) else {
                continue;
            };
            let dir = path.parent().unwrap_or_else(|| Path::new(""));

            let in_dir = |name: String| dir.join(name).to_string_lossy().to_string();
            candidates.insert(in_dir(format!("{stem}_test.{ext}")));
            candidates.insert(in_dir(format!("{stem}.test.{ext}")));
            candidates.insert(in_dir(format!("{stem}.spec.{ext}")));
            candidates.insert(in_dir(format!("__tests__/{stem}.{ext}")));
            candidates.insert(in_dir(format!("test_{stem}.{ext}")));
            candidates.insert(format!("tests/{stem}_test.{ext}"));
        }

        candidates
            .into_iter()
            .filter(|c| self.root.join(c).is_file())
            .collect()
    }

    /// Map file paths onto the closed set of semantic domains.
    ///
    /// Returns sorted, deduplicated domain names.
    pub fn infer_domains(files: &[String]) -> Vec<String> {
        let mut domains = BTreeSet::new();
        for file in files {
            let lower = file.to_lowercase();
            for (fragment, domain) in DOMAIN_PATTERNS {
                if lower.contains(fragment) {
                    domains.insert((*domain).to_string());
                }
            }
        }
        domains.into_iter().collect()
    }

    /// Join each domain with its canonical neighbour set.
    ///
    /// Returns sorted neighbours not already in the input.
    pub fn expand_related_domains(domains: &[String]) -> Vec<String> {
        let mut related = BTreeSet::new();
        for domain in domains {
            if let Some((_, neighbours)) = RELATED_DOMAINS.iter().find(|(d, _)| d == domain) {
                for n in *neighbours {
                    related.insert((*n).to_string());
                }
            }
        }
        related
            .into_iter()
            .filter(|d| !domains.contains(d))
            .collect()
    }

    /// Greedily read files into the budget.
    ///
    /// Whole files are preferred; when the next file does not fit and at
    /// least [`MIN_TOKENS_FOR_PARTIAL`] tokens remain, the file is cut to
    /// the remaining allowance with a truncation marker. Returns the
    /// documents read and whether anything was truncated.
    pub async fn read_files_partial(
        &self,
        files: &[String],
        budget: &mut TokenBudget,
        estimator: &TokenEstimator,
    ) -> (BTreeMap<String, String>, bool) {
        let mut documents = BTreeMap::new();
        let mut truncated = false;

        for file in files {
            let content = match self.read_file(file).await {
                Ok(c) => c,
                Err(e) => {
                    debug!(%file, error = %e, "skipping unreadable file");
                    continue;
                }
            };

            let tokens = estimator.estimate(&content);
            if budget.can_fit(tokens) {
                budget
                    .try_allocate(format!("file:{file}"), tokens);
                documents.insert(file.clone(), content);
                continue;
            }

            if budget.remaining() >= MIN_TOKENS_FOR_PARTIAL {
                let granted = budget.try_allocate(format!("file:{file}"), budget.remaining());
                let mut cut = estimator.to_bytes(granted).min(content.len());
                while cut > 0 && !content.is_char_boundary(cut) {
                    cut -= 1;
                }
                let mut partial = content[..cut].to_string();
                partial.push('\n');
                partial.push_str(PARTIAL_TRUNCATION_MARKER);
                documents.insert(file.clone(), partial);
                truncated = true;
            }
            break;
        }

        (documents, truncated)
    }
}
