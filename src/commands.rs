//! CLI command definitions
//!
//! All CLI structs and subcommand enums are defined here.

use cadence::Phase;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Cadence - self-pacing agent teams over a shared mission directory
#[derive(Parser, Debug)]
#[command(name = "cadence")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (default: ./cadence.yaml)
    #[arg(short, long, global = true, env = "CADENCE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a starter config, prompts and docs directory
    Init {
        /// Directory to initialize
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,
    },

    /// Validate the config and print every problem found
    Validate,

    /// Run the orchestrator in the foreground until SIGINT/SIGTERM
    Run {
        /// Team to start (default: default_team from the config)
        #[arg(short, long)]
        team: Option<String>,
    },

    /// Compute and print the project map
    Map {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Inspect or override the phase
    #[command(subcommand)]
    Phase(PhaseCommands),

    /// Show per-agent status from the last run
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum PhaseCommands {
    /// Show the persisted phase, token total and headroom
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Switch phase manually (expansion or convergence)
    Force {
        /// Target phase
        phase: Phase,
    },
}
