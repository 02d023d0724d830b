//! NATS JetStream fabric
//!
//! Thin adapters from the substrate traits onto async-nats: a durable
//! pull consumer per worker and a revision-guarded KV bucket for state.

use std::time::Duration;

use async_nats::jetstream;
use async_nats::jetstream::AckKind;
use async_nats::jetstream::consumer::PullConsumer;
use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, info};

use super::error::{FabricError, StateError};
use super::stream::{ConsumerSpec, Delivery, MessageFetcher, StateEntry, StateStore, WorkflowStream};
use crate::state::ExecutionState;

/// Connection to a JetStream-enabled NATS server
pub struct NatsFabric {
    jetstream: jetstream::Context,
}

impl NatsFabric {
    /// Connect to a broker URL
    pub async fn connect(url: &str) -> Result<Self, FabricError> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| FabricError::Broker(e.to_string()))?;
        info!(url, "connected to broker");
        Ok(Self {
            jetstream: jetstream::new(client),
        })
    }

    /// Open (or create) the workflow stream covering `workflow.>`
    pub async fn workflow_stream(&self, name: &str) -> Result<NatsStream, FabricError> {
        let stream = self
            .jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: name.to_string(),
                subjects: vec!["workflow.>".to_string()],
                ..Default::default()
            })
            .await
            .map_err(|e| FabricError::Broker(e.to_string()))?;

        Ok(NatsStream {
            stream,
            context: self.jetstream.clone(),
        })
    }

    /// Open (or create) the state KV bucket
    pub async fn state_bucket(&self, bucket: &str) -> Result<NatsStateStore, FabricError> {
        let kv = match self.jetstream.get_key_value(bucket).await {
            Ok(kv) => kv,
            Err(_) => self
                .jetstream
                .create_key_value(jetstream::kv::Config {
                    bucket: bucket.to_string(),
                    ..Default::default()
                })
                .await
                .map_err(|e| FabricError::Broker(e.to_string()))?,
        };
        Ok(NatsStateStore { kv })
    }
}

/// JetStream-backed workflow stream
pub struct NatsStream {
    stream: jetstream::stream::Stream,
    context: jetstream::Context,
}

#[async_trait]
impl WorkflowStream for NatsStream {
    async fn consumer(&self, spec: &ConsumerSpec) -> Result<Box<dyn MessageFetcher>, FabricError> {
        let consumer: PullConsumer = self
            .stream
            .get_or_create_consumer(
                &spec.durable_name,
                jetstream::consumer::pull::Config {
                    durable_name: Some(spec.durable_name.clone()),
                    filter_subject: spec.filter_subject.clone(),
                    ack_policy: jetstream::consumer::AckPolicy::Explicit,
                    ack_wait: spec.ack_wait,
                    max_deliver: spec.max_deliver,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| FabricError::Consumer(e.to_string()))?;

        debug!(
            durable = %spec.durable_name,
            filter = %spec.filter_subject,
            "bound durable consumer"
        );
        Ok(Box::new(NatsFetcher { consumer }))
    }

    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), FabricError> {
        let ack = self
            .context
            .publish(subject.to_string(), payload.into())
            .await
            .map_err(|e| FabricError::Publish {
                subject: subject.to_string(),
                reason: e.to_string(),
            })?;
        ack.await.map_err(|e| FabricError::Publish {
            subject: subject.to_string(),
            reason: e.to_string(),
        })?;
        Ok(())
    }
}

struct NatsFetcher {
    consumer: PullConsumer,
}

#[async_trait]
impl MessageFetcher for NatsFetcher {
    async fn fetch(&mut self, max_wait: Duration) -> Result<Option<Box<dyn Delivery>>, FabricError> {
        let mut batch = self
            .consumer
            .fetch()
            .max_messages(1)
            .expires(max_wait)
            .messages()
            .await
            .map_err(|e| FabricError::Broker(e.to_string()))?;

        match batch.next().await {
            Some(Ok(message)) => Ok(Some(Box::new(NatsDelivery { message }))),
            Some(Err(e)) => Err(FabricError::Broker(e.to_string())),
            None => Ok(None),
        }
    }
}

struct NatsDelivery {
    message: jetstream::Message,
}

#[async_trait]
impl Delivery for NatsDelivery {
    fn subject(&self) -> &str {
        self.message.subject.as_str()
    }

    fn payload(&self) -> &[u8] {
        &self.message.payload
    }

    fn delivery_count(&self) -> u64 {
        self.message.info().map(|i| i.delivered as u64).unwrap_or(1)
    }

    async fn ack(&self) -> Result<(), FabricError> {
        self.message.ack().await.map_err(|e| FabricError::Ack(e.to_string()))
    }

    async fn nak(&self) -> Result<(), FabricError> {
        self.message
            .ack_with(AckKind::Nak(None))
            .await
            .map_err(|e| FabricError::Ack(e.to_string()))
    }

    async fn in_progress(&self) -> Result<(), FabricError> {
        self.message
            .ack_with(AckKind::Progress)
            .await
            .map_err(|e| FabricError::Ack(e.to_string()))
    }
}

/// JetStream KV-backed state store
pub struct NatsStateStore {
    kv: jetstream::kv::Store,
}

#[async_trait]
impl StateStore for NatsStateStore {
    async fn get(&self, key: &str) -> Result<Option<StateEntry>, StateError> {
        let entry = self
            .kv
            .entry(key)
            .await
            .map_err(|e| StateError::Bucket(e.to_string()))?;

        match entry {
            Some(entry) if entry.operation == jetstream::kv::Operation::Put => {
                let state: ExecutionState = serde_json::from_slice(&entry.value)?;
                Ok(Some(StateEntry {
                    state,
                    revision: entry.revision,
                }))
            }
            _ => Ok(None),
        }
    }

    async fn create(&self, key: &str, state: &ExecutionState) -> Result<u64, StateError> {
        let bytes = serde_json::to_vec(state)?;
        self.kv
            .create(key, bytes.into())
            .await
            .map_err(|e| classify_kv_error(key, 0, e.to_string()))
    }

    async fn update(&self, key: &str, state: &ExecutionState, revision: u64) -> Result<u64, StateError> {
        let bytes = serde_json::to_vec(state)?;
        self.kv
            .update(key, bytes.into(), revision)
            .await
            .map_err(|e| classify_kv_error(key, revision, e.to_string()))
    }
}

/// The server reports revision guard trips as "wrong last sequence"
fn classify_kv_error(key: &str, revision: u64, message: String) -> StateError {
    let lower = message.to_lowercase();
    if lower.contains("wrong last sequence") {
        StateError::StaleRevision {
            key: key.to_string(),
            held: revision,
        }
    } else if lower.contains("already exists") {
        StateError::AlreadyExists(key.to_string())
    } else {
        StateError::Bucket(message)
    }
}
