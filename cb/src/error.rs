//! Context builder error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while assembling a context bundle
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("path {path:?} is outside repository {root:?}")]
    OutsideRepository { path: PathBuf, root: PathBuf },

    #[error("invalid git ref: {0:?}")]
    InvalidRef(String),

    #[error("git {args} failed: {stderr}")]
    Git { args: String, stderr: String },

    #[error("graph request failed: {0}")]
    Graph(String),

    #[error("graph transport error: {0}")]
    GraphTransport(#[from] reqwest::Error),

    #[error("token budget exceeded: {label} needs {needed} tokens, {remaining} remaining")]
    BudgetExceeded {
        label: String,
        needed: usize,
        remaining: usize,
    },

    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ContextError {
    /// Check if this is a budget exhaustion error
    pub fn is_budget(&self) -> bool {
        matches!(self, ContextError::BudgetExceeded { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_budget() {
        let err = ContextError::BudgetExceeded {
            label: "sops".to_string(),
            needed: 1500,
            remaining: 1000,
        };
        assert!(err.is_budget());

        let err = ContextError::Graph("502".to_string());
        assert!(!err.is_budget());
    }
}
