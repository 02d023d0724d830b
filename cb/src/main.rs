//! ContextBuilder CLI entry point

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result, eyre};

use contextbuilder::cli::{Cli, Command};
use contextbuilder::{
    CapabilityBudgets, ContextBuilder, ContextRequest, FileGatherer, GraphClient, TaskType,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .init();

    match cli.command {
        Command::Build {
            task_type,
            topic,
            files,
            git_ref,
            graph_url,
            budget,
        } => {
            let task_type: TaskType = serde_json::from_value(serde_json::Value::String(task_type.clone()))
                .map_err(|_| eyre!("unknown task type: {task_type}"))?;

            let graph = match graph_url {
                Some(url) => Some(GraphClient::new(url).context("building graph client")?),
                None => None,
            };
            let graph_ready = graph.is_some();

            let builder = ContextBuilder::new(&cli.repo, graph, CapabilityBudgets::new(budget))
                .context("opening repository")?;

            let request = ContextRequest {
                task_type,
                topic,
                files,
                git_ref,
                graph_ready,
                ..Default::default()
            };
            let response = builder.build(&request).await;

            if let Some(err) = &response.error {
                eprintln!("{} {}", "build failed:".red().bold(), err);
            }
            println!("{}", serde_json::to_string_pretty(&response)?);
        }

        Command::Domains { files } => {
            let domains = FileGatherer::infer_domains(&files);
            let related = FileGatherer::expand_related_domains(&domains);
            println!("{} {}", "domains:".bold(), domains.join(", "));
            println!("{} {}", "related:".bold(), related.join(", "));
        }

        Command::TestFiles { files } => {
            let gatherer = FileGatherer::new(&cli.repo).context("opening repository")?;
            for test in gatherer.find_test_files(&files) {
                println!("{test}");
            }
        }
    }

    Ok(())
}
