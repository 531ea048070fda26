//! CLI argument parsing via clap.

use clap::{Parser, Subcommand};
use conductor::build_info::LONG_VERSION;

/// Run shell work as background tasks with approvals and live logs.
#[derive(Debug, Parser)]
#[command(name = "conductor", version, long_version = LONG_VERSION)]
pub struct Args {
    /// Path to config file (default: ./conductor.toml or ~/.config/conductor/conductor.toml).
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<String>,

    /// Approve every action without asking.
    #[arg(long = "yolo", global = true)]
    pub yolo: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run one command to completion, streaming NDJSON records to stdout.
    Run {
        /// Command line to run. One step per line.
        command: String,

        /// Print a single JSON document when the run ends instead of streaming.
        #[arg(long = "batch")]
        batch: bool,
    },
    /// Show how a grep command would be rewritten, without running it.
    Rewrite {
        /// Command line to inspect.
        command: String,
    },
}
