//! Check selection and execution

use std::path::{Component, Path};
use std::time::Instant;

use glob::Pattern;
use tracing::{debug, warn};

use super::{Check, CheckResult, Checklist, ValidationReport, load};

/// Select the checks to run for a set of modified files.
///
/// An empty file list means a full scan: every check runs. Otherwise a
/// check runs when any trigger glob matches any file, tried against both
/// the full path and the basename (so `*.go` matches `pkg/foo/bar.go`).
pub fn select_checks<'a>(checklist: &'a Checklist, files: &[String]) -> Vec<&'a Check> {
    if files.is_empty() {
        return checklist.checks.iter().collect();
    }

    checklist
        .checks
        .iter()
        .filter(|check| {
            check.trigger.iter().any(|trigger| {
                let Ok(pattern) = Pattern::new(trigger) else {
                    warn!(check = %check.name, trigger, "invalid trigger glob");
                    return false;
                };
                files.iter().any(|file| {
                    pattern.matches(file)
                        || Path::new(file)
                            .file_name()
                            .and_then(|n| n.to_str())
                            .is_some_and(|base| pattern.matches(base))
                })
            })
        })
        .collect()
}

/// Split a command into argv, honouring single and double quotes.
///
/// No shell is involved and no escape sequences are interpreted;
/// commands that need shell features wrap themselves in `sh -c`.
pub fn tokenize(command: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for c in command.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '\'' || c == '"' => quote = Some(c),
            None if c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            None => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Execute one check under its timeout, capturing output.
///
/// A timeout yields exit code -1 and a failed result; the process is
/// killed through the expired context.
pub async fn run_check(check: &Check, repo: &Path) -> CheckResult {
    let argv = tokenize(&check.command);
    let start = Instant::now();

    let failure = |exit_code: i32, stderr: String, duration_ms: u64| CheckResult {
        name: check.name.clone(),
        passed: false,
        required: check.required,
        command: check.command.clone(),
        exit_code,
        stdout: String::new(),
        stderr,
        duration_ms,
    };

    if argv.is_empty() {
        return failure(-1, "empty command".to_string(), 0);
    }

    let working_dir = match resolve_working_dir(repo, check.working_dir.as_deref()) {
        Ok(dir) => dir,
        Err(reason) => return failure(-1, reason, 0),
    };

    let timeout = check.effective_timeout();
    debug!(check = %check.name, ?timeout, dir = %working_dir.display(), "running check");

    let mut command = tokio::process::Command::new(&argv[0]);
    command.args(&argv[1..]).current_dir(&working_dir).kill_on_drop(true);

    let output = match tokio::time::timeout(timeout, command.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return failure(-1, format!("failed to spawn: {e}"), start.elapsed().as_millis() as u64);
        }
        Err(_) => {
            return failure(
                -1,
                format!("check timed out after {timeout:?}"),
                start.elapsed().as_millis() as u64,
            );
        }
    };

    let exit_code = output.status.code().unwrap_or(-1);
    CheckResult {
        name: check.name.clone(),
        passed: exit_code == 0,
        required: check.required,
        command: check.command.clone(),
        exit_code,
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        duration_ms: start.elapsed().as_millis() as u64,
    }
}

/// Resolve a working dir under the repository root, rejecting escapes
fn resolve_working_dir(repo: &Path, working_dir: Option<&str>) -> Result<std::path::PathBuf, String> {
    let Some(rel) = working_dir else {
        return Ok(repo.to_path_buf());
    };
    let rel_path = Path::new(rel);
    if rel_path.is_absolute() || rel_path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(format!("working_dir {rel:?} escapes the repository"));
    }
    Ok(repo.join(rel_path))
}

/// Run the checklist for a repository.
///
/// A missing checklist degrades to a passing report with a warning; an
/// unreadable one fails every aggregate.
pub async fn run_checklist(repo: &Path, checklist_dir: &str, files_modified: &[String]) -> ValidationReport {
    let checklist = match load(repo, checklist_dir) {
        Ok(Some(checklist)) => checklist,
        Ok(None) => {
            return ValidationReport {
                passed: true,
                checks_run: 0,
                results: Vec::new(),
                warning: Some(format!(
                    "no checklist at {checklist_dir}/{}; skipping structural validation",
                    super::CHECKLIST_FILE
                )),
            };
        }
        Err(e) => {
            return ValidationReport {
                passed: false,
                checks_run: 0,
                results: Vec::new(),
                warning: Some(e.to_string()),
            };
        }
    };

    let selected = select_checks(&checklist, files_modified);
    let mut results = Vec::with_capacity(selected.len());
    for check in &selected {
        results.push(run_check(check, repo).await);
    }

    let passed = results.iter().filter(|r| r.required).all(|r| r.passed);
    ValidationReport {
        passed,
        checks_run: results.len() as u32,
        results,
        warning: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn checklist(checks: Vec<Check>) -> Checklist {
        Checklist {
            version: "1".to_string(),
            checks,
        }
    }

    fn check(name: &str, command: &str, trigger: &[&str], required: bool) -> Check {
        Check {
            name: name.to_string(),
            command: command.to_string(),
            trigger: trigger.iter().map(|s| s.to_string()).collect(),
            category: "test".to_string(),
            required,
            timeout: None,
            working_dir: None,
        }
    }

    #[test]
    fn test_tokenize_plain() {
        assert_eq!(tokenize("cargo check --all"), vec!["cargo", "check", "--all"]);
    }

    #[test]
    fn test_tokenize_quotes() {
        assert_eq!(
            tokenize(r#"sh -c "cargo test --all && echo done""#),
            vec!["sh", "-c", "cargo test --all && echo done"]
        );
        assert_eq!(tokenize("echo 'hello world'"), vec!["echo", "hello world"]);
    }

    #[test]
    fn test_tokenize_no_escapes() {
        // Backslashes pass through untouched
        assert_eq!(tokenize(r"echo a\ b"), vec!["echo", r"a\", "b"]);
    }

    #[test]
    fn test_select_checks_by_trigger() {
        let cl = checklist(vec![
            check("go", "gofmt -l .", &["*.go"], true),
            check("rust", "cargo check", &["*.rs"], true),
        ]);

        let selected = select_checks(&cl, &["pkg/foo/bar.go".to_string()]);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].name, "go");
    }

    #[test]
    fn test_select_checks_full_scan_on_empty() {
        let cl = checklist(vec![
            check("go", "gofmt -l .", &["*.go"], true),
            check("rust", "cargo check", &["*.rs"], true),
        ]);

        let selected = select_checks(&cl, &[]);
        assert_eq!(selected.len(), 2);
    }

    #[tokio::test]
    async fn test_run_check_captures_output() {
        let temp = tempdir().unwrap();
        let c = check("hello", "echo hello", &["*.go"], true);

        let result = run_check(&c, temp.path()).await;
        assert!(result.passed);
        assert_eq!(result.exit_code, 0);
        assert!(result.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_run_check_timeout() {
        let temp = tempdir().unwrap();
        let c = Check {
            timeout: Some("100ms".to_string()),
            ..check("slow", "sleep 5", &["*.go"], true)
        };

        let result = run_check(&c, temp.path()).await;
        assert!(!result.passed);
        assert_eq!(result.exit_code, -1);
        assert!(result.stderr.contains("timed out"));
    }

    #[tokio::test]
    async fn test_run_check_rejects_escaping_working_dir() {
        let temp = tempdir().unwrap();
        let c = Check {
            working_dir: Some("../outside".to_string()),
            ..check("escape", "echo hi", &["*.go"], true)
        };

        let result = run_check(&c, temp.path()).await;
        assert!(!result.passed);
        assert!(result.stderr.contains("escapes"));
    }

    #[tokio::test]
    async fn test_run_checklist_missing_degrades_gracefully() {
        let temp = tempdir().unwrap();
        let report = run_checklist(temp.path(), super::super::CHECKLIST_DIR, &[]).await;

        assert!(report.passed);
        assert_eq!(report.checks_run, 0);
        assert!(report.warning.is_some());
    }

    #[tokio::test]
    async fn test_run_checklist_optional_failure_does_not_flip() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join(super::super::CHECKLIST_DIR);
        fs::create_dir_all(&dir).unwrap();
        let cl = checklist(vec![
            check("required-ok", "echo hello", &["*.go"], true),
            check("optional-bad", "false", &["*.go"], false),
        ]);
        fs::write(dir.join(super::super::CHECKLIST_FILE), serde_json::to_string(&cl).unwrap()).unwrap();

        let report = run_checklist(temp.path(), super::super::CHECKLIST_DIR, &["main.go".to_string()]).await;

        assert!(report.passed);
        assert_eq!(report.checks_run, 2);
        let optional = report.results.iter().find(|r| r.name == "optional-bad").unwrap();
        assert!(!optional.passed);
    }

    #[tokio::test]
    async fn test_run_checklist_full_scan_fallback() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join(super::super::CHECKLIST_DIR);
        fs::create_dir_all(&dir).unwrap();
        let cl = checklist(vec![
            check("a", "echo a", &["*.go"], true),
            check("b", "echo b", &["*.rs"], false),
        ]);
        fs::write(dir.join(super::super::CHECKLIST_FILE), serde_json::to_string(&cl).unwrap()).unwrap();

        let report = run_checklist(temp.path(), super::super::CHECKLIST_DIR, &[]).await;
        assert_eq!(report.checks_run, 2);
    }

    #[tokio::test]
    async fn test_run_checklist_required_failure_flips() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join(super::super::CHECKLIST_DIR);
        fs::create_dir_all(&dir).unwrap();
        let cl = checklist(vec![check("bad", "false", &["*.go"], true)]);
        fs::write(dir.join(super::super::CHECKLIST_FILE), serde_json::to_string(&cl).unwrap()).unwrap();

        let report = run_checklist(temp.path(), super::super::CHECKLIST_DIR, &["main.go".to_string()]).await;
        assert!(!report.passed);
    }
}
