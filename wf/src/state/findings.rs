//! Review findings and their human-readable projection
//!
//! The structured findings array serializes into JSON that reads badly
//! inside a prompt, so every consumer that embeds findings into text uses
//! the markdown projection instead.

use serde::{Deserialize, Serialize};

/// Severity of one finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FindingSeverity {
    Error,
    #[default]
    Warning,
    Info,
}

impl std::fmt::Display for FindingSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FindingSeverity::Error => write!(f, "error"),
            FindingSeverity::Warning => write!(f, "warning"),
            FindingSeverity::Info => write!(f, "info"),
        }
    }
}

/// One SOP-vs-artifact observation from a reviewer
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Finding {
    /// SOP the observation is grounded in, when there is one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sop_id: Option<String>,

    pub severity: FindingSeverity,

    /// e.g. "violation", "suggestion", "pass"
    pub status: String,

    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u64>,
}

/// Render findings as markdown grouped by severity
pub fn format_findings(findings: &[Finding]) -> String {
    if findings.is_empty() {
        return "No findings.".to_string();
    }

    let mut out = String::new();
    for severity in [FindingSeverity::Error, FindingSeverity::Warning, FindingSeverity::Info] {
        let group: Vec<&Finding> = findings.iter().filter(|f| f.severity == severity).collect();
        if group.is_empty() {
            continue;
        }
        out.push_str(&format!("## {severity}\n\n"));
        for f in group {
            out.push_str("- ");
            if let Some(file) = &f.file {
                match f.line {
                    Some(line) => out.push_str(&format!("`{file}:{line}` ")),
                    None => out.push_str(&format!("`{file}` ")),
                }
            }
            out.push_str(&f.message);
            if let Some(sop) = &f.sop_id {
                out.push_str(&format!(" ({sop})"));
            }
            out.push('\n');
        }
        out.push('\n');
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_empty() {
        assert_eq!(format_findings(&[]), "No findings.");
    }

    #[test]
    fn test_format_groups_by_severity() {
        let findings = vec![
            Finding {
                severity: FindingSeverity::Warning,
                status: "suggestion".to_string(),
                message: "prefer early returns".to_string(),
                ..Default::default()
            },
            Finding {
                sop_id: Some("sop/auth".to_string()),
                severity: FindingSeverity::Error,
                status: "violation".to_string(),
                message: "tokens must expire".to_string(),
                file: Some("auth/token.go".to_string()),
                line: Some(42),
            },
        ];

        let out = format_findings(&findings);
        // Errors come first regardless of input order
        let error_pos = out.find("## error").unwrap();
        let warning_pos = out.find("## warning").unwrap();
        assert!(error_pos < warning_pos);
        assert!(out.contains("`auth/token.go:42` tokens must expire (sop/auth)"));
    }

    #[test]
    fn test_findings_round_trip() {
        let finding = Finding {
            severity: FindingSeverity::Error,
            status: "violation".to_string(),
            message: "x".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_string(&finding).unwrap();
        assert!(json.contains("\"severity\":\"error\""));
        let back: Finding = serde_json::from_str(&json).unwrap();
        assert_eq!(back.severity, FindingSeverity::Error);
    }
}
