//! CLI type definitions.
//!
//! Grounded on the teacher's `cli::types`: a `clap` derive `Cli` wrapping
//! a `Commands` enum, with a global `--json` flag. sunwell's surface is
//! the goal-execution command from spec §6 plus a small set of
//! teacher-style admin subcommands (`init`, `reclaim`, `memory`).

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "sunwell")]
#[command(about = "Sunwell - Agentic Orchestration Runtime", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output machine-readable JSON instead of formatted tables.
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProviderArg {
    Openai,
    Anthropic,
    Ollama,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TrustArg {
    ReadOnly,
    Workspace,
    Shell,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute a goal, or emit its artifact DAG with `--plan`.
    Run {
        /// Natural-language goal description.
        goal: String,

        /// Dry run: compute and print the artifact DAG without executing it.
        #[arg(long)]
        plan: bool,

        /// Force every task onto a single provider.
        #[arg(long)]
        provider: Option<ProviderArg>,

        /// Force every task onto a specific model id.
        #[arg(long)]
        model: Option<String>,

        /// Abort the goal if it runs longer than this many seconds.
        #[arg(long)]
        time: Option<u64>,

        /// Trust ceiling for tool execution (spec §6).
        #[arg(long, value_enum, default_value_t = TrustArg::Workspace)]
        trust: TrustArg,

        /// Enable self-introspection tools (spec §4.9 Mirror).
        #[arg(long)]
        mirror: bool,

        /// Enable Lens-driven model routing (spec §4.3).
        #[arg(long)]
        model_routing: bool,

        /// Path to a Lens YAML file (spec §6). Defaults to an empty Lens
        /// with no heuristics/personas when omitted.
        #[arg(long)]
        lens: Option<std::path::PathBuf>,

        /// Disable identity extraction for this run (spec §4.10).
        #[arg(long)]
        no_identity: bool,
    },

    /// Initialize `.sunwell/config.yaml` and the backlog/database directories.
    Init {
        /// Overwrite an existing configuration file.
        #[arg(short, long)]
        force: bool,
    },

    /// Release claims on goals past their stale-claim timeout (spec §4.2).
    Reclaim,

    /// Memory inspection commands.
    #[command(subcommand)]
    Memory(MemoryCommands),
}

#[derive(Subcommand)]
pub enum MemoryCommands {
    /// Print the long-term performance summary across all models.
    Summary,
}
