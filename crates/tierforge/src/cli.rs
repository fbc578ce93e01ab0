use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Background LLM code generation with tiered model escalation
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to tierforge.toml (defaults to ./tierforge.toml when present)
    #[arg(long, global = true, env = "TIERFORGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Answer every prompt with a local stub instead of calling backends
    #[arg(long, global = true, default_value_t = false)]
    pub offline: bool,

    /// Log filter (overrides RUST_LOG)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true, default_value_t = false)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one or more tasks to completion and print a summary
    Run(RunArgs),

    /// Interactive session: submit tasks and query them while they run
    Session(SubmitArgs),

    /// Print the loaded tier catalog
    Tiers,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Task descriptions, one workflow each
    #[arg(required_unless_present = "stdin")]
    pub descriptions: Vec<String>,

    /// Also read one task per line from stdin
    #[arg(long, default_value_t = false)]
    pub stdin: bool,

    /// Print the final records as JSON instead of a table
    #[arg(long, default_value_t = false)]
    pub json: bool,

    #[command(flatten)]
    pub submit: SubmitArgs,
}

#[derive(Args, Debug, Clone)]
pub struct SubmitArgs {
    /// Tier ladder to use (defaults to [scheduler] default_purpose)
    #[arg(long)]
    pub purpose: Option<String>,

    /// Highest tier level to escalate to
    #[arg(long)]
    pub max_levels: Option<u32>,

    /// How long to wait for a workflow before giving up on it
    #[arg(long, default_value_t = 900)]
    pub wait_secs: u64,
}
