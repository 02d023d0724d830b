//! Git state gathering
//!
//! Thin wrapper over the `git` binary. Refs are validated before ever
//! reaching a command line, and non-zero exits with empty stderr are
//! treated as empty output (git's "no diff" behaviour).

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tokio::process::Command;
use tracing::debug;

use crate::error::ContextError;

/// Marker appended when a diff is cut at file boundaries
pub const DIFF_TRUNCATION_MARKER: &str = "...[diff truncated to fit token budget]";

/// Accepts branch/tag names, HEAD forms, hashes, and two-dot ranges
static GIT_REF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9][a-zA-Z0-9_./-]*(?:~\d+)?(?:\.\.[a-zA-Z0-9][a-zA-Z0-9_./-]*(?:~\d+)?)?$|^HEAD(?:~\d+)?(?:\.\.HEAD(?:~\d+)?)?$",
    )
    .expect("git ref regex is valid")
});

/// Validate a git ref against the accepted grammar.
///
/// Control characters are rejected outright; everything else must match
/// the ref regex.
pub fn validate_git_ref(git_ref: &str) -> Result<(), ContextError> {
    if git_ref.is_empty() || git_ref.chars().any(|c| c.is_control()) {
        return Err(ContextError::InvalidRef(git_ref.to_string()));
    }
    if !GIT_REF_RE.is_match(git_ref) {
        return Err(ContextError::InvalidRef(git_ref.to_string()));
    }
    Ok(())
}

/// Runs git queries against one repository
#[derive(Debug, Clone)]
pub struct GitGatherer {
    repo: PathBuf,
}

impl GitGatherer {
    pub fn new(repo: impl Into<PathBuf>) -> Self {
        Self { repo: repo.into() }
    }

    pub fn repo(&self) -> &Path {
        &self.repo
    }

    async fn run(&self, args: &[&str]) -> Result<String, ContextError> {
        debug!(?args, repo = %self.repo.display(), "running git");
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo)
            .output()
            .await
            .map_err(|source| ContextError::Io {
                path: self.repo.clone(),
                source,
            })?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).to_string());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if stderr.is_empty() {
            // git exits non-zero with nothing on stderr to mean "no output"
            return Ok(String::new());
        }

        Err(ContextError::Git {
            args: args.join(" "),
            stderr,
        })
    }

    /// Diff against a ref (working tree when `None`), optionally narrowed
    /// to specific files.
    pub async fn diff(&self, git_ref: Option<&str>, files: &[String]) -> Result<String, ContextError> {
        let mut args = vec!["diff"];
        if let Some(r) = git_ref {
            validate_git_ref(r)?;
            args.push(r);
        }
        if !files.is_empty() {
            args.push("--");
            for f in files {
                args.push(f.as_str());
            }
        }
        self.run(&args).await
    }

    /// Names of files changed relative to a ref
    pub async fn changed_files(&self, git_ref: Option<&str>) -> Result<Vec<String>, ContextError> {
        let mut args = vec!["diff", "--name-only"];
        if let Some(r) = git_ref {
            validate_git_ref(r)?;
            args.push(r);
        }
        let out = self.run(&args).await?;
        Ok(out.lines().map(|l| l.trim().to_string()).filter(|l| !l.is_empty()).collect())
    }

    /// Staged diff (`git diff --staged`)
    pub async fn staged_diff(&self) -> Result<String, ContextError> {
        self.run(&["diff", "--staged"]).await
    }

    /// Recent commit subjects, newest first
    pub async fn log_recent(&self, count: usize) -> Result<String, ContextError> {
        let n = format!("-{count}");
        self.run(&["log", &n, "--oneline"]).await
    }

    /// Current branch name
    pub async fn current_branch(&self) -> Result<String, ContextError> {
        let out = self.run(&["rev-parse", "--abbrev-ref", "HEAD"]).await?;
        Ok(out.trim().to_string())
    }
}

/// Cut a diff at `diff --git` boundaries so only whole files survive,
/// appending a truncation marker.
///
/// Returns the input unchanged when it already fits.
pub fn truncate_diff_by_files(diff: &str, max_bytes: usize) -> String {
    if diff.len() <= max_bytes {
        return diff.to_string();
    }

    let mut kept = String::new();
    for segment in split_diff_segments(diff) {
        if kept.len() + segment.len() > max_bytes {
            break;
        }
        kept.push_str(segment);
    }

    if !kept.is_empty() && !kept.ends_with('\n') {
        kept.push('\n');
    }
    kept.push_str(DIFF_TRUNCATION_MARKER);
    kept
}

/// Split a unified diff into per-file segments starting at `diff --git`
fn split_diff_segments(diff: &str) -> Vec<&str> {
    const HEADER: &str = "diff --git ";
    let mut starts = Vec::new();

    if diff.starts_with(HEADER) {
        starts.push(0);
    }
    let needle = format!("\n{HEADER}");
    let mut offset = 0;
    while let Some(pos) = diff[offset..].find(&needle) {
        starts.push(offset + pos + 1);
        offset += pos + 1;
    }

    if starts.is_empty() {
        return vec![diff];
    }

    let mut segments = Vec::with_capacity(starts.len());
    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(diff.len());
        segments.push(&diff[start..end]);
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_validate_git_ref_accepts() {
        for r in ["HEAD", "HEAD~1", "HEAD~1..HEAD", "main", "refs/heads/main", "v1.2.3", "abc123f", "main..feature/x"] {
            assert!(validate_git_ref(r).is_ok(), "{r} should be accepted");
        }
    }

    #[test]
    fn test_validate_git_ref_rejects() {
        for r in ["a; rm -rf /", "feature/\x00", "", "-rf", "..", "a b"] {
            assert!(validate_git_ref(r).is_err(), "{r:?} should be rejected");
        }
    }

    fn sample_diff() -> String {
        let mut diff = String::new();
        for (name, body_len) in [("one.go", 2000usize), ("two.go", 2000), ("three.go", 2000)] {
            diff.push_str(&format!("diff --git a/{name} b/{name}\n"));
            diff.push_str(&format!("--- a/{name}\n+++ b/{name}\n"));
            diff.push_str(&"+x\n".repeat(body_len / 3));
        }
        diff
    }

    #[test]
    fn test_truncate_diff_keeps_whole_leading_files() {
        let diff = sample_diff();
        assert!(diff.len() > 3500);

        let out = truncate_diff_by_files(&diff, 3500);
        assert!(out.starts_with("diff --git"));
        assert!(out.ends_with(DIFF_TRUNCATION_MARKER));
        assert!(out.contains("one.go"));
        assert!(!out.contains("three.go"));
        // The kept prefix must be strictly shorter than the input
        assert!(out.len() < diff.len());
    }

    #[test]
    fn test_truncate_diff_untouched_when_fits() {
        let diff = sample_diff();
        let out = truncate_diff_by_files(&diff, diff.len());
        assert_eq!(out, diff);
    }

    #[test]
    fn test_truncate_diff_nothing_fits() {
        let diff = sample_diff();
        let out = truncate_diff_by_files(&diff, 10);
        assert_eq!(out, DIFF_TRUNCATION_MARKER);
    }

    async fn init_repo(dir: &std::path::Path) {
        for args in [
            vec!["init", "-q"],
            vec!["config", "user.email", "t@example.com"],
            vec!["config", "user.name", "t"],
        ] {
            Command::new("git").args(&args).current_dir(dir).output().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_diff_empty_repo_is_empty() {
        let temp = tempdir().unwrap();
        init_repo(temp.path()).await;

        let g = GitGatherer::new(temp.path());
        let diff = g.diff(None, &[]).await.unwrap();
        assert!(diff.is_empty());
    }

    #[tokio::test]
    async fn test_changed_files_lists_modified() {
        let temp = tempdir().unwrap();
        init_repo(temp.path()).await;
        fs::write(temp.path().join("a.txt"), "one\n").unwrap();
        Command::new("git")
            .args(["add", "."])
            .current_dir(temp.path())
            .output()
            .await
            .unwrap();
        Command::new("git")
            .args(["commit", "-q", "-m", "init"])
            .current_dir(temp.path())
            .output()
            .await
            .unwrap();
        fs::write(temp.path().join("a.txt"), "two\n").unwrap();

        let g = GitGatherer::new(temp.path());
        let files = g.changed_files(None).await.unwrap();
        assert_eq!(files, vec!["a.txt".to_string()]);

        let diff = g.diff(None, &[]).await.unwrap();
        assert!(diff.starts_with("diff --git"));
    }

    #[tokio::test]
    async fn test_diff_rejects_bad_ref() {
        let temp = tempdir().unwrap();
        init_repo(temp.path()).await;

        let g = GitGatherer::new(temp.path());
        let err = g.diff(Some("a; rm -rf /"), &[]).await.unwrap_err();
        assert!(matches!(err, ContextError::InvalidRef(_)));
    }
}
