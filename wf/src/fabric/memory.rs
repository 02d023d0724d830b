//! In-memory fabric
//!
//! Reproduces the broker semantics the workers depend on - durable
//! consumers with filter subjects, nak redelivery up to `max_deliver`,
//! and revision-guarded KV updates - without a broker. Backs the test
//! suite and `wf` local development.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::error::{FabricError, StateError};
use super::stream::{ConsumerSpec, Delivery, MessageFetcher, StateEntry, StateStore, WorkflowStream};
use super::subjects::subject_matches;
use crate::state::ExecutionState;

#[derive(Debug, Clone)]
struct QueuedMessage {
    subject: String,
    payload: Vec<u8>,
    delivery_count: u64,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<QueuedMessage>,
    max_deliver: i64,
}

#[derive(Default)]
struct Inner {
    /// One queue per durable name
    queues: Mutex<HashMap<String, Arc<Mutex<QueueState>>>>,
    /// Filter subject per durable name
    filters: Mutex<HashMap<String, String>>,
    /// Everything ever published, for assertions
    published: Mutex<Vec<(String, Vec<u8>)>>,
    /// KV records: key -> (revision, serialized state)
    state: Mutex<HashMap<String, (u64, String)>>,
    revision_counter: AtomicU64,
}

/// In-memory stream + state store
#[derive(Clone, Default)]
pub struct MemoryFabric {
    inner: Arc<Inner>,
}

impl MemoryFabric {
    pub fn new() -> Self {
        Self::default()
    }

    /// All messages published to subjects matching a filter
    pub async fn published(&self, filter: &str) -> Vec<(String, Vec<u8>)> {
        self.inner
            .published
            .lock()
            .await
            .iter()
            .filter(|(subject, _)| subject_matches(filter, subject))
            .cloned()
            .collect()
    }

    /// Number of messages waiting for a durable consumer
    pub async fn pending(&self, durable_name: &str) -> usize {
        let queues = self.inner.queues.lock().await;
        match queues.get(durable_name) {
            Some(q) => q.lock().await.pending.len(),
            None => 0,
        }
    }
}

#[async_trait]
impl WorkflowStream for MemoryFabric {
    async fn consumer(&self, spec: &ConsumerSpec) -> Result<Box<dyn MessageFetcher>, FabricError> {
        // Locks are taken one at a time; publish() nests filters->queues
        let queue = {
            let mut queues = self.inner.queues.lock().await;
            queues
                .entry(spec.durable_name.clone())
                .or_insert_with(|| {
                    Arc::new(Mutex::new(QueueState {
                        pending: VecDeque::new(),
                        max_deliver: spec.max_deliver,
                    }))
                })
                .clone()
        };
        queue.lock().await.max_deliver = spec.max_deliver;

        self.inner
            .filters
            .lock()
            .await
            .insert(spec.durable_name.clone(), spec.filter_subject.clone());

        Ok(Box::new(MemoryFetcher { queue }))
    }

    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), FabricError> {
        self.inner
            .published
            .lock()
            .await
            .push((subject.to_string(), payload.clone()));

        let filters = self.inner.filters.lock().await;
        let queues = self.inner.queues.lock().await;
        for (durable, filter) in filters.iter() {
            if subject_matches(filter, subject)
                && let Some(queue) = queues.get(durable)
            {
                queue.lock().await.pending.push_back(QueuedMessage {
                    subject: subject.to_string(),
                    payload: payload.clone(),
                    delivery_count: 1,
                });
            }
        }
        Ok(())
    }
}

struct MemoryFetcher {
    queue: Arc<Mutex<QueueState>>,
}

#[async_trait]
impl MessageFetcher for MemoryFetcher {
    async fn fetch(&mut self, max_wait: Duration) -> Result<Option<Box<dyn Delivery>>, FabricError> {
        let message = self.queue.lock().await.pending.pop_front();
        match message {
            Some(message) => Ok(Some(Box::new(MemoryDelivery {
                message,
                queue: self.queue.clone(),
            }))),
            None => {
                // Model the broker's fetch wait without busy-looping tests
                tokio::time::sleep(max_wait.min(Duration::from_millis(20))).await;
                Ok(None)
            }
        }
    }
}

struct MemoryDelivery {
    message: QueuedMessage,
    queue: Arc<Mutex<QueueState>>,
}

#[async_trait]
impl Delivery for MemoryDelivery {
    fn subject(&self) -> &str {
        &self.message.subject
    }

    fn payload(&self) -> &[u8] {
        &self.message.payload
    }

    fn delivery_count(&self) -> u64 {
        self.message.delivery_count
    }

    async fn ack(&self) -> Result<(), FabricError> {
        Ok(())
    }

    async fn nak(&self) -> Result<(), FabricError> {
        let mut queue = self.queue.lock().await;
        let next_count = self.message.delivery_count + 1;
        if next_count <= queue.max_deliver as u64 {
            queue.pending.push_front(QueuedMessage {
                subject: self.message.subject.clone(),
                payload: self.message.payload.clone(),
                delivery_count: next_count,
            });
        }
        Ok(())
    }

    async fn in_progress(&self) -> Result<(), FabricError> {
        Ok(())
    }
}

#[async_trait]
impl StateStore for MemoryFabric {
    async fn get(&self, key: &str) -> Result<Option<StateEntry>, StateError> {
        let map = self.inner.state.lock().await;
        match map.get(key) {
            Some((revision, json)) => {
                let state: ExecutionState = serde_json::from_str(json)?;
                Ok(Some(StateEntry {
                    state,
                    revision: *revision,
                }))
            }
            None => Ok(None),
        }
    }

    async fn create(&self, key: &str, state: &ExecutionState) -> Result<u64, StateError> {
        let mut map = self.inner.state.lock().await;
        if map.contains_key(key) {
            return Err(StateError::AlreadyExists(key.to_string()));
        }
        let revision = self.inner.revision_counter.fetch_add(1, Ordering::SeqCst) + 1;
        map.insert(key.to_string(), (revision, serde_json::to_string(state)?));
        Ok(revision)
    }

    async fn update(&self, key: &str, state: &ExecutionState, revision: u64) -> Result<u64, StateError> {
        let mut map = self.inner.state.lock().await;
        let Some((current, _)) = map.get(key) else {
            return Err(StateError::Bucket(format!("no record for {key}")));
        };
        if *current != revision {
            return Err(StateError::StaleRevision {
                key: key.to_string(),
                held: revision,
            });
        }
        let next = self.inner.revision_counter.fetch_add(1, Ordering::SeqCst) + 1;
        map.insert(key.to_string(), (next, serde_json::to_string(state)?));
        Ok(next)
    }
}
