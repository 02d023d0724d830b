//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// All worker names the daemon can run
pub const ALL_WORKERS: &[&str] = &[
    "planner",
    "plan-reviewer",
    "task-generator",
    "task-reviewer",
    "developer",
    "code-reviewer",
    "structural-validator",
];

/// Workfabric - reactive workflow fabric for LLM-driven pipelines
#[derive(Parser)]
#[command(
    name = "wf",
    about = "Run workflow workers against a durable message stream",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Start workers and consume from the workflow stream
    Run {
        /// Workers to start (default: all)
        #[arg(short, long)]
        workers: Vec<String>,

        /// Broker URL override
        #[arg(long)]
        broker_url: Option<String>,
    },

    /// Run the structural checklist locally and report
    Check {
        /// Modified files to select checks for (empty = full scan)
        files: Vec<String>,

        /// Repository root
        #[arg(short, long, default_value = ".")]
        repo: PathBuf,
    },

    /// Show an execution's state record
    State {
        /// Execution id to look up
        execution_id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_check_defaults() {
        let cli = Cli::parse_from(["wf", "check", "main.go"]);
        match cli.command {
            Command::Check { files, repo } => {
                assert_eq!(files, vec!["main.go".to_string()]);
                assert_eq!(repo, PathBuf::from("."));
            }
            _ => panic!("expected check"),
        }
    }

    #[test]
    fn test_run_workers_flag() {
        let cli = Cli::parse_from(["wf", "run", "-w", "planner", "-w", "developer"]);
        match cli.command {
            Command::Run { workers, .. } => {
                assert_eq!(workers, vec!["planner".to_string(), "developer".to_string()]);
            }
            _ => panic!("expected run"),
        }
    }
}
