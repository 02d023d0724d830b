//! End-to-end worker fabric tests
//!
//! Drive real workers over the in-memory fabric: publish a trigger,
//! let the fetch loop pick it up, and observe the state machine advance
//! under the revision guard.

use std::sync::Arc;
use std::time::Duration;

use tempfile::tempdir;

use contextbuilder::{CapabilityBudgets, ContextBuilder};
use workfabric::config::{BrokerConfig, Config};
use workfabric::envelope::Envelope;
use workfabric::fabric::{MemoryFabric, StateStore, WorkflowStream};
use workfabric::llm::testing::ScriptedLlm;
use workfabric::llm::{CallStore, LlmClient};
use workfabric::prompts::PromptRegistry;
use workfabric::state::ExecutionState;
use workfabric::worker::{TriggerCommon, Worker, WorkerHandle};
use workfabric::workers::triggers::{PlanTrigger, ValidateTrigger};
use workfabric::workers::{LlmDeps, Planner, StructuralValidator};

const PLAN_JSON: &str = r#"{
    "title": "Add auth",
    "summary": "Token-based auth.",
    "goals": ["issue tokens"],
    "non_goals": [],
    "phases": [{"name": "tokens", "description": "issue", "validation": "tests"}],
    "risks": []
}"#;

fn broker_config() -> BrokerConfig {
    BrokerConfig {
        fetch_max_wait: Duration::from_millis(50),
        ..Default::default()
    }
}

fn llm_deps(repo: &std::path::Path, llm: Arc<dyn LlmClient>) -> LlmDeps {
    LlmDeps {
        llm,
        prompts: Arc::new(PromptRegistry::new()),
        context: Arc::new(ContextBuilder::new(repo, None, CapabilityBudgets::new(8000)).unwrap()),
        calls: Arc::new(CallStore::new()),
        capability: "planning".to_string(),
        temperature: 0.2,
        max_tokens: 4096,
        context_timeout: Duration::from_secs(5),
        graph_ready: false,
    }
}

async fn start_planner(fabric: &MemoryFabric, repo: &std::path::Path, llm: Arc<dyn LlmClient>) -> WorkerHandle {
    let config = Config::default();
    let stream: Arc<dyn WorkflowStream> = Arc::new(fabric.clone());
    let state: Arc<dyn StateStore> = Arc::new(fabric.clone());
    let planner = Planner::new(llm_deps(repo, llm), repo.join("plans"));

    Worker::new(
        config.worker("planner"),
        broker_config(),
        stream,
        state,
        Arc::new(planner),
        "test",
    )
    .start()
    .await
    .unwrap()
}

async fn publish_plan_trigger(fabric: &MemoryFabric, execution_id: &str) {
    let trigger = PlanTrigger {
        common: TriggerCommon {
            execution_id: execution_id.to_string(),
            slug: "auth".to_string(),
            ..Default::default()
        },
        title: "Add auth".to_string(),
        iteration: 0,
        max_iterations: 3,
    };
    let envelope = Envelope::new("test", &trigger).unwrap();
    fabric
        .publish("workflow.trigger.planner", envelope.to_bytes().unwrap())
        .await
        .unwrap();
}

/// Poll the state bucket until the execution reaches a phase
async fn wait_for_phase(fabric: &MemoryFabric, execution_id: &str, phase: &str) -> ExecutionState {
    for _ in 0..100 {
        if let Some(entry) = fabric.get(execution_id).await.unwrap()
            && entry.state.phase == phase
        {
            return entry.state;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let current = fabric
        .get(execution_id)
        .await
        .unwrap()
        .map(|e| e.state.phase)
        .unwrap_or_else(|| "<missing>".to_string());
    panic!("execution {execution_id} never reached {phase}, stuck at {current}");
}

#[tokio::test]
async fn test_planner_advances_generating_to_planned() {
    let temp = tempdir().unwrap();
    let fabric = MemoryFabric::new();

    let state = ExecutionState::new("exec-1", "plan-review", "generating", "auth", "Add auth");
    fabric.create("exec-1", &state).await.unwrap();

    let llm: Arc<ScriptedLlm> = Arc::new(ScriptedLlm::new().respond(PLAN_JSON));
    let handle = start_planner(&fabric, temp.path(), llm.clone()).await;

    publish_plan_trigger(&fabric, "exec-1").await;
    let final_state = wait_for_phase(&fabric, "exec-1", "planned").await;
    handle.stop().await;

    assert!(final_state.plan_content.is_some());
    assert_eq!(final_state.llm_request_ids().len(), 1);
    assert!(temp.path().join("plans/auth.json").is_file());

    // Result envelope went out on the result subject
    let results = fabric.published("workflow.result.planner.*").await;
    assert_eq!(results.len(), 1);
}

#[tokio::test]
async fn test_duplicate_delivery_completes_once() {
    let temp = tempdir().unwrap();
    let fabric = MemoryFabric::new();

    let state = ExecutionState::new("exec-1", "plan-review", "generating", "auth", "Add auth");
    fabric.create("exec-1", &state).await.unwrap();

    // Script two identical responses in case both deliveries reach the model
    let llm: Arc<ScriptedLlm> = Arc::new(ScriptedLlm::new().respond(PLAN_JSON).respond(PLAN_JSON));
    let handle = start_planner(&fabric, temp.path(), llm.clone()).await;

    publish_plan_trigger(&fabric, "exec-1").await;
    publish_plan_trigger(&fabric, "exec-1").await;

    let final_state = wait_for_phase(&fabric, "exec-1", "planned").await;

    // Let the duplicate drain (it acks as already-completed or loses CAS)
    tokio::time::sleep(Duration::from_millis(300)).await;
    handle.stop().await;

    // Exactly one delivery completed the phase write
    assert_eq!(final_state.phase, "planned");
    let entry = fabric.get("exec-1").await.unwrap().unwrap();
    assert_eq!(entry.state.phase, "planned");
    assert!(entry.state.llm_request_ids().len() <= 2);
}

#[tokio::test]
async fn test_format_exhaustion_lands_in_generator_failed() {
    let temp = tempdir().unwrap();
    let fabric = MemoryFabric::new();

    let state = ExecutionState::new("exec-1", "plan-review", "generating", "auth", "Add auth");
    fabric.create("exec-1", &state).await.unwrap();

    let mut scripted = ScriptedLlm::new();
    for _ in 0..=workfabric::MAX_FORMAT_RETRIES {
        scripted = scripted.respond("never json");
    }
    let handle = start_planner(&fabric, temp.path(), Arc::new(scripted)).await;

    publish_plan_trigger(&fabric, "exec-1").await;
    let final_state = wait_for_phase(&fabric, "exec-1", "generator_failed").await;
    handle.stop().await;

    assert!(final_state.error.is_some());
    assert!(final_state.error.unwrap().contains("did not parse"));
}

#[tokio::test]
async fn test_poison_message_is_acked_without_state_change() {
    let temp = tempdir().unwrap();
    let fabric = MemoryFabric::new();

    let state = ExecutionState::new("exec-1", "plan-review", "generating", "auth", "Add auth");
    fabric.create("exec-1", &state).await.unwrap();

    let handle = start_planner(&fabric, temp.path(), Arc::new(ScriptedLlm::new())).await;

    fabric
        .publish("workflow.trigger.planner", b"definitely not an envelope".to_vec())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let metrics = handle.metrics().snapshot();
    handle.stop().await;

    // Processed and failed, never retried, state untouched
    assert_eq!(metrics.triggers_processed, 1);
    assert_eq!(metrics.triggers_failed, 1);
    let entry = fabric.get("exec-1").await.unwrap().unwrap();
    assert_eq!(entry.state.phase, "generating");
}

#[tokio::test]
async fn test_validator_writes_check_results_and_validated_phase() {
    let temp = tempdir().unwrap();
    std::fs::create_dir_all(temp.path().join(".workfabric")).unwrap();
    std::fs::write(
        temp.path().join(".workfabric/checklist.json"),
        r#"{"version": "1", "checks": [
            {"name": "hello", "command": "echo hello", "trigger": ["*.go"], "category": "test", "required": true},
            {"name": "optional-bad", "command": "false", "trigger": ["*.go"], "category": "lint", "required": false}
        ]}"#,
    )
    .unwrap();

    let fabric = MemoryFabric::new();
    let state = ExecutionState::new("exec-9", "task-execution-loop", "validating", "auth", "Add auth");
    fabric.create("exec-9", &state).await.unwrap();

    let config = Config::default();
    let stream: Arc<dyn WorkflowStream> = Arc::new(fabric.clone());
    let state_store: Arc<dyn StateStore> = Arc::new(fabric.clone());
    let validator = StructuralValidator::new(temp.path(), ".workfabric");

    let handle = Worker::new(
        config.worker("structural-validator"),
        broker_config(),
        stream,
        state_store,
        Arc::new(validator),
        "test",
    )
    .start()
    .await
    .unwrap();

    let trigger = ValidateTrigger {
        common: TriggerCommon {
            execution_id: "exec-9".to_string(),
            slug: "auth".to_string(),
            ..Default::default()
        },
        files_modified: vec!["main.go".to_string()],
    };
    let envelope = Envelope::new("test", &trigger).unwrap();
    fabric
        .publish("workflow.trigger.structural-validator", envelope.to_bytes().unwrap())
        .await
        .unwrap();

    let final_state = wait_for_phase(&fabric, "exec-9", "validated").await;
    handle.stop().await;

    // Optional failure recorded but the aggregate passes
    assert_eq!(final_state.validation_passed, Some(true));
    assert_eq!(final_state.checks_run, Some(2));
    let results = final_state.check_results.unwrap();
    assert_eq!(results.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_callback_published_for_async_step() {
    let temp = tempdir().unwrap();
    let fabric = MemoryFabric::new();

    let state = ExecutionState::new("exec-cb", "plan-review", "generating", "auth", "Add auth");
    fabric.create("exec-cb", &state).await.unwrap();

    let llm: Arc<ScriptedLlm> = Arc::new(ScriptedLlm::new().respond(PLAN_JSON));
    let handle = start_planner(&fabric, temp.path(), llm).await;

    let trigger = PlanTrigger {
        common: TriggerCommon {
            execution_id: "exec-cb".to_string(),
            slug: "auth".to_string(),
            callback_subject: Some("workflow.step-callback.exec-cb.task-1".to_string()),
            task_id: Some("task-1".to_string()),
            ..Default::default()
        },
        title: "Add auth".to_string(),
        iteration: 0,
        max_iterations: 3,
    };
    let envelope = Envelope::new("test", &trigger).unwrap();
    fabric
        .publish("workflow.trigger.planner", envelope.to_bytes().unwrap())
        .await
        .unwrap();

    wait_for_phase(&fabric, "exec-cb", "planned").await;
    handle.stop().await;

    let callbacks = fabric.published("workflow.step-callback.exec-cb.task-1").await;
    assert_eq!(callbacks.len(), 1);
    let envelope = Envelope::from_bytes(&callbacks[0].1).unwrap();
    assert_eq!(envelope.payload["status"], "completed");
}

#[tokio::test]
async fn test_legacy_trigger_without_state_publishes_result_only() {
    let temp = tempdir().unwrap();
    let fabric = MemoryFabric::new();

    // No KV record is created for this execution
    let llm: Arc<ScriptedLlm> = Arc::new(ScriptedLlm::new().respond(PLAN_JSON));
    let handle = start_planner(&fabric, temp.path(), llm).await;

    publish_plan_trigger(&fabric, "exec-legacy").await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    let metrics = handle.metrics().snapshot();
    handle.stop().await;

    assert_eq!(metrics.triggers_success, 1);
    assert!(fabric.get("exec-legacy").await.unwrap().is_none());
    let results = fabric.published("workflow.result.planner.auth").await;
    assert_eq!(results.len(), 1);
}
