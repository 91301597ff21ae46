//! # Ripple CLI Module
//!
//! ## Available Commands
//!
//! - `check` - Build the pipeline and print its topology
//! - `run` - Run one generation over a set of inputs
//! - `replay` - Run a scripted sequence of generations
//! - `snapshot` - Run one generation and write its canonical snapshot
//! - `verify` - Validate a snapshot file
//! - `hash` - Run one generation and print the BLAKE3 hash of its snapshot
//! - `server` - Start the HTTP server

mod commands;

use clap::{Parser, Subcommand};
use ripple_core::PipelineError;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Ripple - incremental pipeline host
///
/// Feeds root inputs through a staged pipeline and reuses every intermediate
/// result an edit did not affect.
#[derive(Parser, Debug)]
#[command(name = "ripple")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Print per-stage summaries
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the pipeline definition
    #[arg(short, long, global = true, default_value = "ripple.toml")]
    pub config: PathBuf,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build the pipeline and report topology faults
    Check,

    /// Run one generation
    Run {
        /// Input directory, or JSON file of key/value pairs
        #[arg(short, long)]
        inputs: PathBuf,
    },

    /// Run a sequence of generations from a JSON script
    Replay {
        /// Replay script
        #[arg(short, long)]
        script: PathBuf,
    },

    /// Run one generation and write its canonical snapshot
    Snapshot {
        /// Input directory, or JSON file of key/value pairs
        #[arg(short, long)]
        inputs: PathBuf,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Validate a snapshot file and print its summary
    Verify {
        /// Snapshot file
        #[arg(short, long)]
        snapshot: PathBuf,
    },

    /// Print the BLAKE3 hash of one generation's snapshot
    Hash {
        /// Input directory, or JSON file of key/value pairs
        #[arg(short, long)]
        inputs: PathBuf,
    },

    /// Start HTTP server
    Server {
        /// Host to bind to
        #[arg(short = 'H', long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind to
        #[arg(short, long, default_value = "8080")]
        port: u16,

        /// Initial inputs
        #[arg(short, long)]
        inputs: Option<PathBuf>,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), PipelineError> {
    let out = Output {
        json: cli.json_mode,
        verbose: cli.verbose,
    };
    let config = cli.config.as_path();

    match cli.command {
        Some(Commands::Check) | None => cmd_check(config, out),
        Some(Commands::Run { inputs }) => cmd_run(config, &inputs, out),
        Some(Commands::Replay { script }) => cmd_replay(config, &script, out),
        Some(Commands::Snapshot { inputs, output }) => cmd_snapshot(config, &inputs, &output, out),
        Some(Commands::Verify { snapshot }) => cmd_verify(&snapshot, out),
        Some(Commands::Hash { inputs }) => cmd_hash(config, &inputs, out),
        Some(Commands::Server { host, port, inputs }) => {
            cmd_server(config, inputs.as_deref(), &host, port).await
        }
    }
}
