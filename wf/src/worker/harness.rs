//! Worker harness: fetch loop and message protocol
//!
//! The protocol, in order: decode and validate (invalid messages are
//! poison-acked), signal in-progress, run the handler, then write the
//! completion phase under the revision guard. Transient failures nak so
//! the broker retries; business failures move the workflow to its failed
//! phase and ack; a revision conflict naks because another delivery
//! already completed the work.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{StepCallback, TriggerCommon, WorkResult, WorkerError, WorkerMetrics};
use crate::config::{BrokerConfig, WorkerConfig};
use crate::envelope::{Envelope, Payload};
use crate::fabric::{ConsumerSpec, Delivery, StateStore, WorkflowStream, subjects};
use crate::state::{ExecutionState, StateUpdate, WorkflowMachine};

/// Access to the correlation fields of a trigger payload
pub trait Trigger {
    fn common(&self) -> &TriggerCommon;
}

/// One worker's behaviour, plugged into the harness
#[async_trait]
pub trait TriggerHandler: Send + Sync + 'static {
    type Trigger: Payload + Trigger;

    fn name(&self) -> &'static str;

    fn machine(&self) -> &'static WorkflowMachine;

    /// Phase written before the work starts, when the machine has one
    fn working_phase(&self) -> Option<&'static str> {
        None
    }

    /// Phase written on success
    fn completion_phase(&self) -> &'static str;

    /// Phase written on business failure
    fn failed_phase(&self) -> &'static str;

    /// Do the work. `state` is the record as read before the handler ran,
    /// `None` when the execution has no KV record (legacy trigger).
    async fn run(
        &self,
        trigger: &Self::Trigger,
        state: Option<&ExecutionState>,
    ) -> Result<StateUpdate, WorkerError>;
}

/// A started worker's control handle
pub struct WorkerHandle {
    pub name: &'static str,
    metrics: Arc<WorkerMetrics>,
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn metrics(&self) -> &WorkerMetrics {
        &self.metrics
    }

    /// Signal shutdown and wait for the fetch loop to drain
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.join.await;
    }
}

/// A worker: configuration plus handler, bound to the fabric
pub struct Worker<H: TriggerHandler> {
    config: WorkerConfig,
    broker: BrokerConfig,
    stream: Arc<dyn WorkflowStream>,
    state: Arc<dyn StateStore>,
    handler: Arc<H>,
    metrics: Arc<WorkerMetrics>,
    source: String,
}

impl<H: TriggerHandler> Worker<H> {
    pub fn new(
        config: WorkerConfig,
        broker: BrokerConfig,
        stream: Arc<dyn WorkflowStream>,
        state: Arc<dyn StateStore>,
        handler: Arc<H>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            config,
            broker,
            stream,
            state,
            handler,
            metrics: Arc::new(WorkerMetrics::default()),
            source: source.into(),
        }
    }

    pub fn metrics(&self) -> Arc<WorkerMetrics> {
        self.metrics.clone()
    }

    /// Bind the durable consumer and spawn the fetch loop
    pub async fn start(self) -> Result<WorkerHandle, crate::fabric::FabricError> {
        let spec = ConsumerSpec {
            stream: self.config.stream_name.clone(),
            durable_name: self.config.consumer_name.clone(),
            filter_subject: self.config.trigger_subject.clone(),
            ack_wait: self.config.ack_wait(),
            max_deliver: self.broker.max_deliver,
        };
        let mut fetcher = self.stream.consumer(&spec).await?;
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let name = self.handler.name();
        info!(worker = name, subject = %spec.filter_subject, "worker started");

        let metrics = self.metrics.clone();
        let join = tokio::spawn(async move {
            loop {
                if *shutdown_rx.borrow() {
                    break;
                }
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    fetched = fetcher.fetch(self.broker.fetch_max_wait) => match fetched {
                        Ok(Some(delivery)) => self.handle_delivery(delivery.as_ref()).await,
                        Ok(None) => {}
                        Err(e) => {
                            warn!(worker = self.handler.name(), error = %e, "fetch failed");
                            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                        }
                    },
                }
            }
            debug!(worker = self.handler.name(), "fetch loop drained");
        });

        Ok(WorkerHandle {
            name,
            metrics,
            shutdown: shutdown_tx,
            join,
        })
    }

    /// The canonical message protocol
    async fn handle_delivery(&self, delivery: &dyn Delivery) {
        self.metrics.record_trigger();

        // (1) Decode and validate; invalid messages can never succeed,
        // so they are acked without a state change.
        let envelope = match Envelope::from_bytes(delivery.payload()) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(worker = self.handler.name(), error = %e, "poison message");
                self.metrics.record_failure();
                let _ = delivery.ack().await;
                return;
            }
        };
        let trigger: H::Trigger = match envelope.decode() {
            Ok(trigger) => trigger,
            Err(e) => {
                warn!(worker = self.handler.name(), error = %e, "poison payload");
                self.metrics.record_failure();
                let _ = delivery.ack().await;
                return;
            }
        };
        let common = trigger.common().clone();

        // (2) Suppress redelivery while the (potentially long) LLM call runs
        let _ = delivery.in_progress().await;

        // (4) Read the execution record
        let entry = match self.state.get(&common.execution_id).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(execution_id = %common.execution_id, error = %e, "state read failed");
                self.metrics.record_failure();
                let _ = delivery.nak().await;
                return;
            }
        };

        let Some(entry) = entry else {
            self.handle_legacy(&trigger, &common, delivery).await;
            return;
        };

        let mut revision = entry.revision;
        let mut state = entry.state;

        // A redelivery of already-completed work: the revision guard let
        // the first delivery win, nothing left to do here.
        if state.phase == self.handler.completion_phase() {
            debug!(execution_id = %common.execution_id, "duplicate delivery of completed work");
            let _ = delivery.ack().await;
            return;
        }

        // Mark the working phase when the machine defines one
        if let Some(working) = self.handler.working_phase()
            && state.phase != working
        {
            if let Err(e) = self.handler.machine().advance(&mut state, working) {
                warn!(execution_id = %common.execution_id, error = %e, "unexpected phase, poison-acking");
                self.metrics.record_failure();
                let _ = delivery.ack().await;
                return;
            }
            match self.state.update(&common.execution_id, &state, revision).await {
                Ok(next) => revision = next,
                Err(e) => {
                    // Stale: another delivery holds this execution
                    debug!(execution_id = %common.execution_id, error = %e, "working-phase CAS lost");
                    self.metrics.record_failure();
                    let _ = delivery.nak().await;
                    return;
                }
            }
        }

        // (3) Do the work
        match self.handler.run(&trigger, Some(&state)).await {
            Ok(update) => {
                self.complete(&common, state, revision, update, delivery).await;
            }
            Err(WorkerError::Transient(reason)) => {
                warn!(execution_id = %common.execution_id, %reason, "transient failure, nak");
                self.metrics.record_failure();
                let _ = delivery.nak().await;
            }
            Err(WorkerError::Business(reason)) => {
                self.fail(&common, state, revision, reason, delivery).await;
            }
        }
    }

    /// (5)+(6) Write completion phase and payload under the revision
    /// guard, publish the result, ack.
    async fn complete(
        &self,
        common: &TriggerCommon,
        mut state: ExecutionState,
        revision: u64,
        update: StateUpdate,
        delivery: &dyn Delivery,
    ) {
        update.clone().apply(&mut state);
        state.error = None;

        if let Err(e) = self.handler.machine().advance(&mut state, self.handler.completion_phase()) {
            warn!(execution_id = %common.execution_id, error = %e, "completion transition rejected");
            self.metrics.record_failure();
            let _ = delivery.ack().await;
            return;
        }

        match self.state.update(&common.execution_id, &state, revision).await {
            Ok(_) => {
                self.publish_result(common, &update).await;
                self.publish_callback(common, "completed", None).await;
                self.metrics.record_success();
                let _ = delivery.ack().await;
                info!(
                    worker = self.handler.name(),
                    execution_id = %common.execution_id,
                    phase = %state.phase,
                    "work completed"
                );
            }
            Err(e) => {
                debug!(execution_id = %common.execution_id, error = %e, "completion CAS lost, nak");
                self.metrics.record_failure();
                let _ = delivery.nak().await;
            }
        }
    }

    /// Business failure: move to the failed phase, then ack
    async fn fail(
        &self,
        common: &TriggerCommon,
        mut state: ExecutionState,
        revision: u64,
        reason: String,
        delivery: &dyn Delivery,
    ) {
        warn!(
            worker = self.handler.name(),
            execution_id = %common.execution_id,
            %reason,
            "business failure"
        );
        state.error = Some(reason.clone());

        if let Err(e) = self.handler.machine().advance(&mut state, self.handler.failed_phase()) {
            warn!(execution_id = %common.execution_id, error = %e, "failed-phase transition rejected");
            self.metrics.record_failure();
            let _ = delivery.ack().await;
            return;
        }

        match self.state.update(&common.execution_id, &state, revision).await {
            Ok(_) => {
                self.publish_callback(common, "failed", Some(&reason)).await;
                self.metrics.record_failure();
                let _ = delivery.ack().await;
            }
            Err(e) => {
                debug!(execution_id = %common.execution_id, error = %e, "failure CAS lost, nak");
                self.metrics.record_failure();
                let _ = delivery.nak().await;
            }
        }
    }

    /// Legacy best-effort path: no KV record, publish on the result
    /// subject only.
    async fn handle_legacy(&self, trigger: &H::Trigger, common: &TriggerCommon, delivery: &dyn Delivery) {
        debug!(execution_id = %common.execution_id, "no state record, legacy best-effort");

        match self.handler.run(trigger, None).await {
            Ok(update) => {
                self.publish_result(common, &update).await;
                self.publish_callback(common, "completed", None).await;
                self.metrics.record_success();
                let _ = delivery.ack().await;
            }
            Err(WorkerError::Transient(reason)) => {
                warn!(execution_id = %common.execution_id, %reason, "transient failure, nak");
                self.metrics.record_failure();
                let _ = delivery.nak().await;
            }
            Err(WorkerError::Business(reason)) => {
                self.publish_callback(common, "failed", Some(&reason)).await;
                self.metrics.record_failure();
                let _ = delivery.ack().await;
            }
        }
    }

    async fn publish_result(&self, common: &TriggerCommon, update: &StateUpdate) {
        let result = WorkResult {
            execution_id: common.execution_id.clone(),
            slug: common.slug.clone(),
            worker: self.handler.name().to_string(),
            phase: self.handler.completion_phase().to_string(),
            update: update.clone(),
        };
        let subject = subjects::result_subject(&self.config.result_subject_prefix, self.handler.name(), &common.slug);
        self.publish(&subject, &result).await;
    }

    async fn publish_callback(&self, common: &TriggerCommon, status: &str, error: Option<&str>) {
        let (Some(subject), Some(task_id)) = (&common.callback_subject, &common.task_id) else {
            return;
        };
        let callback = StepCallback {
            execution_id: common.execution_id.clone(),
            task_id: task_id.clone(),
            status: status.to_string(),
            error: error.map(|e| e.to_string()),
        };
        self.publish(subject, &callback).await;
    }

    async fn publish<P: Payload>(&self, subject: &str, payload: &P) {
        let envelope = match Envelope::new(&self.source, payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(subject, error = %e, "failed to build envelope");
                return;
            }
        };
        match envelope.to_bytes() {
            Ok(bytes) => {
                if let Err(e) = self.stream.publish(subject, bytes).await {
                    warn!(subject, error = %e, "publish failed");
                }
            }
            Err(e) => warn!(subject, error = %e, "failed to serialize envelope"),
        }
    }
}
