//! Workfabric CLI entry point

use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result, eyre};
use tracing::{info, warn};

use contextbuilder::{CapabilityBudgets, ContextBuilder, DEFAULT_TOKEN_BUDGET, GraphClient};
use workfabric::checklist::run_checklist;
use workfabric::cli::{ALL_WORKERS, Cli, Command};
use workfabric::config::Config;
use workfabric::fabric::{NatsFabric, StateStore, WorkflowStream};
use workfabric::llm::{CallStore, HttpLlmClient, LlmClient, ModelRegistry};
use workfabric::prompts::PromptRegistry;
use workfabric::worker::{Worker, WorkerHandle};
use workfabric::workers::{
    CodeReviewer, Developer, LlmDeps, PlanReviewer, Planner, StructuralValidator, TaskGenerator, TaskReviewer,
};

fn setup_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Run { workers, broker_url } => run(config, workers, broker_url).await,
        Command::Check { files, repo } => check(config, files, repo).await,
        Command::State { execution_id } => show_state(config, &execution_id).await,
    }
}

/// Start the selected workers and run until interrupted
async fn run(mut config: Config, workers: Vec<String>, broker_url: Option<String>) -> Result<()> {
    if let Some(url) = broker_url {
        config.broker.url = url;
    }
    let selected: Vec<String> = if workers.is_empty() {
        ALL_WORKERS.iter().map(|s| s.to_string()).collect()
    } else {
        workers
    };

    let fabric = NatsFabric::connect(&config.broker.url)
        .await
        .map_err(|e| eyre!("broker connection failed: {e}"))?;
    let stream: Arc<dyn WorkflowStream> = Arc::new(
        fabric
            .workflow_stream(&config.broker.stream_name)
            .await
            .map_err(|e| eyre!("stream setup failed: {e}"))?,
    );
    let state: Arc<dyn StateStore> = Arc::new(
        fabric
            .state_bucket(&config.broker.state_bucket)
            .await
            .map_err(|e| eyre!("state bucket setup failed: {e}"))?,
    );

    let registry = Arc::new(ModelRegistry::from_config(&config.llm));
    let llm: Arc<dyn LlmClient> = Arc::new(
        HttpLlmClient::new(registry.clone(), config.llm.timeout, config.llm.api_key_env.as_deref())
            .map_err(|e| eyre!("llm client setup failed: {e}"))?,
    );
    let calls = Arc::new(CallStore::new());
    let prompts = Arc::new(PromptRegistry::new());

    let graph = match &config.graph.url {
        Some(url) => {
            let client = GraphClient::new(url).map_err(|e| eyre!("graph client setup failed: {e}"))?;
            if config.graph.wait_attempts > 0
                && let Err(e) = client.wait_ready(config.graph.wait_attempts).await
            {
                warn!(error = %e, "graph gateway not ready, SOP gathering will degrade");
            }
            Some(client)
        }
        None => None,
    };
    let graph_ready = graph.is_some();

    let mut budgets = CapabilityBudgets::new(DEFAULT_TOKEN_BUDGET);
    for (capability, tokens) in registry.token_budgets() {
        budgets = budgets.with_capability(capability, tokens);
    }
    let context = Arc::new(
        ContextBuilder::new(&config.repo.root, graph, budgets).context("opening repository for context builds")?,
    );

    let deps = |capability: &str| LlmDeps {
        llm: llm.clone(),
        prompts: prompts.clone(),
        context: context.clone(),
        calls: calls.clone(),
        capability: capability.to_string(),
        temperature: config.llm.temperature,
        max_tokens: config.llm.max_tokens,
        context_timeout: config.worker("planner").context_timeout,
        graph_ready,
    };

    let mut handles: Vec<WorkerHandle> = Vec::new();
    for name in &selected {
        let worker_config = config.worker(name);
        let handle = match name.as_str() {
            "planner" => {
                let plans_dir = config.repo.root.join(&config.repo.plans_dir);
                Worker::new(
                    worker_config,
                    config.broker.clone(),
                    stream.clone(),
                    state.clone(),
                    Arc::new(Planner::new(deps("planning"), plans_dir)),
                    config.source.clone(),
                )
                .start()
                .await
            }
            "plan-reviewer" => Worker::new(
                worker_config,
                config.broker.clone(),
                stream.clone(),
                state.clone(),
                Arc::new(PlanReviewer::new(deps("reviewing"))),
                config.source.clone(),
            )
            .start()
            .await,
            "task-generator" => Worker::new(
                worker_config,
                config.broker.clone(),
                stream.clone(),
                state.clone(),
                Arc::new(TaskGenerator::new(deps("planning"))),
                config.source.clone(),
            )
            .start()
            .await,
            "task-reviewer" => Worker::new(
                worker_config,
                config.broker.clone(),
                stream.clone(),
                state.clone(),
                Arc::new(TaskReviewer::new(deps("reviewing"))),
                config.source.clone(),
            )
            .start()
            .await,
            "developer" => Worker::new(
                worker_config,
                config.broker.clone(),
                stream.clone(),
                state.clone(),
                Arc::new(Developer::new(deps("coding"), &config.repo.root).context("opening repository")?),
                config.source.clone(),
            )
            .start()
            .await,
            "code-reviewer" => Worker::new(
                worker_config,
                config.broker.clone(),
                stream.clone(),
                state.clone(),
                Arc::new(CodeReviewer::new(deps("reviewing"))),
                config.source.clone(),
            )
            .start()
            .await,
            "structural-validator" => Worker::new(
                worker_config,
                config.broker.clone(),
                stream.clone(),
                state.clone(),
                Arc::new(StructuralValidator::new(
                    config.repo.root.clone(),
                    config.repo.checklist_dir.clone(),
                )),
                config.source.clone(),
            )
            .start()
            .await,
            other => return Err(eyre!("unknown worker: {other}")),
        }
        .map_err(|e| eyre!("failed to start {name}: {e}"))?;

        handles.push(handle);
    }

    info!(workers = handles.len(), "all workers running, ctrl-c to stop");
    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutting down");

    for handle in handles {
        let name = handle.name;
        let snapshot = handle.metrics().snapshot();
        handle.stop().await;
        println!(
            "{} processed={} success={} failed={}",
            name.bold(),
            snapshot.triggers_processed,
            snapshot.triggers_success.to_string().green(),
            snapshot.triggers_failed.to_string().red(),
        );
    }
    Ok(())
}

/// Run the checklist locally and print the results
async fn check(config: Config, files: Vec<String>, repo: std::path::PathBuf) -> Result<()> {
    let checklist_dir = config.repo.checklist_dir.clone();
    let report = run_checklist(&repo, &checklist_dir, &files).await;

    if let Some(warning) = &report.warning {
        println!("{} {}", "warning:".yellow().bold(), warning);
    }
    for result in &report.results {
        let status = if result.passed {
            "pass".green()
        } else if result.required {
            "FAIL".red().bold()
        } else {
            "fail".yellow()
        };
        println!(
            "{status} {} ({}, {}ms, exit {})",
            result.name, result.command, result.duration_ms, result.exit_code
        );
        if !result.passed && !result.stderr.is_empty() {
            for line in result.stderr.lines().take(10) {
                println!("    {line}");
            }
        }
    }

    println!(
        "\n{} checks, overall: {}",
        report.checks_run,
        if report.passed { "passed".green().bold() } else { "failed".red().bold() }
    );

    if !report.passed {
        std::process::exit(1);
    }
    Ok(())
}

/// Fetch and print an execution's state record
async fn show_state(config: Config, execution_id: &str) -> Result<()> {
    let fabric = NatsFabric::connect(&config.broker.url)
        .await
        .map_err(|e| eyre!("broker connection failed: {e}"))?;
    let state = fabric
        .state_bucket(&config.broker.state_bucket)
        .await
        .map_err(|e| eyre!("state bucket setup failed: {e}"))?;

    match state.get(execution_id).await {
        Ok(Some(entry)) => {
            println!("{} {}", "revision:".bold(), entry.revision);
            println!("{}", serde_json::to_string_pretty(&entry.state)?);
        }
        Ok(None) => {
            println!("no state record for {execution_id}");
        }
        Err(e) => return Err(eyre!("state read failed: {e}")),
    }
    Ok(())
}
