//! CLI command definitions for the `cb` binary

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// ContextBuilder - ad-hoc context bundle assembly
#[derive(Parser)]
#[command(name = "cb", about = "Assemble token-budgeted LLM context bundles")]
pub struct Cli {
    /// Repository root (defaults to the current directory)
    #[arg(short, long, global = true, default_value = ".")]
    pub repo: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Build a context bundle and print it as JSON
    Build {
        /// Task type (planning, plan-review, code-review, ...)
        #[arg(short, long, default_value = "code-review")]
        task_type: String,

        /// Topic, usually the plan title
        #[arg(long, default_value = "")]
        topic: String,

        /// Already-changed files
        #[arg(long)]
        files: Vec<String>,

        /// Git ref to diff against
        #[arg(long)]
        git_ref: Option<String>,

        /// Graph gateway base URL
        #[arg(long)]
        graph_url: Option<String>,

        /// Token budget for the bundle
        #[arg(long, default_value_t = crate::DEFAULT_TOKEN_BUDGET)]
        budget: usize,
    },

    /// Infer semantic domains for a set of files
    Domains {
        /// Files to classify
        files: Vec<String>,
    },

    /// Find existing test files related to sources
    TestFiles {
        /// Source files
        files: Vec<String>,
    },
}
