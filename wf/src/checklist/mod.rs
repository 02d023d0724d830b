//! Deterministic structural checks
//!
//! An on-disk checklist of shell commands, each tagged with trigger
//! globs, required-ness, and a timeout. The runner selects the checks
//! whose triggers match the modified files and executes them without a
//! shell.

mod runner;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use runner::{run_check, run_checklist, select_checks, tokenize};

/// Directory under the repository root holding the checklist
pub const CHECKLIST_DIR: &str = ".workfabric";

/// Checklist file name
pub const CHECKLIST_FILE: &str = "checklist.json";

/// Fallback per-check timeout
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(120);

/// Checklist errors
#[derive(Debug, Error)]
pub enum ChecklistError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid checklist: {0}")]
    Parse(#[from] serde_json::Error),
}

/// The on-disk checklist document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checklist {
    pub version: String,
    pub checks: Vec<Check>,
}

/// One deterministic check
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Check {
    pub name: String,

    /// Tokenised without a shell; wrap complex commands in `sh -c`
    pub command: String,

    /// Glob patterns that select this check
    pub trigger: Vec<String>,

    /// compile, lint, typecheck, test, ...
    pub category: String,

    /// Required checks flip the aggregate result on failure
    pub required: bool,

    /// Duration string (e.g. "120s"); falls back to the default
    pub timeout: Option<String>,

    /// Working directory relative to the repository root
    pub working_dir: Option<String>,
}

impl Default for Check {
    fn default() -> Self {
        Self {
            name: String::new(),
            command: String::new(),
            trigger: Vec::new(),
            category: String::new(),
            required: true,
            timeout: None,
            working_dir: None,
        }
    }
}

impl Check {
    /// Effective timeout for this check
    pub fn effective_timeout(&self) -> Duration {
        self.timeout
            .as_deref()
            .and_then(|t| crate::config::parse_duration(t).ok())
            .unwrap_or(DEFAULT_CHECK_TIMEOUT)
    }
}

/// Outcome of one executed check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub required: bool,
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

/// Aggregate outcome of a checklist run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    /// True iff every required check passed
    pub passed: bool,

    pub checks_run: u32,

    pub results: Vec<CheckResult>,

    /// Set when the run degraded (e.g. missing checklist)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Load the checklist from `<repo>/<dir>/checklist.json`.
///
/// Returns `Ok(None)` when the file does not exist.
pub fn load(repo: &Path, dir: &str) -> Result<Option<Checklist>, ChecklistError> {
    let path = repo.join(dir).join(CHECKLIST_FILE);
    let content = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(ChecklistError::Io { path, source }),
    };
    let checklist: Checklist = serde_json::from_str(&content)?;
    Ok(Some(checklist))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_load_missing_is_none() {
        let temp = tempdir().unwrap();
        assert!(load(temp.path(), CHECKLIST_DIR).unwrap().is_none());
    }

    #[test]
    fn test_load_and_parse() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join(CHECKLIST_DIR);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join(CHECKLIST_FILE),
            r#"{
                "version": "1",
                "checks": [{
                    "name": "build",
                    "command": "cargo check",
                    "trigger": ["*.rs"],
                    "category": "compile",
                    "required": true,
                    "timeout": "300s"
                }]
            }"#,
        )
        .unwrap();

        let checklist = load(temp.path(), CHECKLIST_DIR).unwrap().unwrap();
        assert_eq!(checklist.version, "1");
        assert_eq!(checklist.checks.len(), 1);
        assert_eq!(checklist.checks[0].effective_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn test_load_rejects_invalid_json() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join(CHECKLIST_DIR);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(CHECKLIST_FILE), "{not json").unwrap();

        assert!(matches!(
            load(temp.path(), CHECKLIST_DIR),
            Err(ChecklistError::Parse(_))
        ));
    }

    #[test]
    fn test_effective_timeout_fallback() {
        let check = Check::default();
        assert_eq!(check.effective_timeout(), DEFAULT_CHECK_TIMEOUT);

        let check = Check {
            timeout: Some("garbage".to_string()),
            ..Default::default()
        };
        assert_eq!(check.effective_timeout(), DEFAULT_CHECK_TIMEOUT);
    }
}
