//! Broker substrate traits
//!
//! The fabric is written against these traits so workers never see a
//! concrete broker. The NATS JetStream implementation lives in
//! [`super::nats`]; an in-memory implementation for tests and local
//! development lives in [`super::memory`].

use std::time::Duration;

use async_trait::async_trait;

use super::error::{FabricError, StateError};
use crate::state::ExecutionState;

/// Binding parameters for one durable consumer
#[derive(Debug, Clone)]
pub struct ConsumerSpec {
    /// Stream to bind against
    pub stream: String,

    /// Durable name; instances sharing it are load-balanced
    pub durable_name: String,

    /// Only messages on this subject are delivered
    pub filter_subject: String,

    /// How long the broker waits for an ack before redelivering
    pub ack_wait: Duration,

    /// Redelivery ceiling
    pub max_deliver: i64,
}

/// One delivered message, with its acknowledgement handle
#[async_trait]
pub trait Delivery: Send + Sync {
    fn subject(&self) -> &str;

    fn payload(&self) -> &[u8];

    /// 1 for first delivery, higher on redelivery
    fn delivery_count(&self) -> u64;

    /// Positive acknowledgement: the message is done
    async fn ack(&self) -> Result<(), FabricError>;

    /// Negative acknowledgement: redeliver (up to `max_deliver`)
    async fn nak(&self) -> Result<(), FabricError>;

    /// Extend the ack window while a long operation runs
    async fn in_progress(&self) -> Result<(), FabricError>;
}

/// Fetches messages for one consumer, one at a time
#[async_trait]
pub trait MessageFetcher: Send {
    /// Wait up to `max_wait` for one message; `None` on timeout
    async fn fetch(&mut self, max_wait: Duration) -> Result<Option<Box<dyn Delivery>>, FabricError>;
}

/// A durable, subject-addressed message stream
#[async_trait]
pub trait WorkflowStream: Send + Sync {
    /// Bind (or re-bind) a durable consumer
    async fn consumer(&self, spec: &ConsumerSpec) -> Result<Box<dyn MessageFetcher>, FabricError>;

    /// Publish a payload to a subject
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), FabricError>;
}

/// A state record together with the revision that read it
#[derive(Debug, Clone)]
pub struct StateEntry {
    pub state: ExecutionState,
    pub revision: u64,
}

/// Revision-guarded KV bucket holding execution state
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Read a record and the revision to guard updates with
    async fn get(&self, key: &str) -> Result<Option<StateEntry>, StateError>;

    /// Create a record; fails if the key exists
    async fn create(&self, key: &str, state: &ExecutionState) -> Result<u64, StateError>;

    /// Compare-and-swap update. Fails with [`StateError::StaleRevision`]
    /// when another writer has advanced the record.
    async fn update(&self, key: &str, state: &ExecutionState, revision: u64) -> Result<u64, StateError>;
}
