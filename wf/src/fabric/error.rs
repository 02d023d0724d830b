//! Fabric error types

use thiserror::Error;

/// Errors from the message stream substrate
#[derive(Debug, Error)]
pub enum FabricError {
    #[error("broker error: {0}")]
    Broker(String),

    #[error("consumer setup failed: {0}")]
    Consumer(String),

    #[error("publish to {subject} failed: {reason}")]
    Publish { subject: String, reason: String },

    #[error("acknowledgement failed: {0}")]
    Ack(String),
}

/// Errors from the state KV substrate
#[derive(Debug, Error)]
pub enum StateError {
    /// The revision guard tripped: another writer got there first.
    /// Surfaced, never retried silently.
    #[error("stale revision for {key}: held {held}")]
    StaleRevision { key: String, held: u64 },

    #[error("state record already exists: {0}")]
    AlreadyExists(String),

    #[error("state bucket error: {0}")]
    Bucket(String),

    #[error("state serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl StateError {
    /// Stale revisions are transient from the worker's point of view:
    /// the broker should redeliver so the conflict can be re-examined.
    pub fn is_stale(&self) -> bool {
        matches!(self, StateError::StaleRevision { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_stale() {
        let err = StateError::StaleRevision {
            key: "exec-1".to_string(),
            held: 3,
        };
        assert!(err.is_stale());
        assert!(!StateError::AlreadyExists("exec-1".to_string()).is_stale());
    }
}
