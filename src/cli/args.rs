// ABOUTME: Command line argument definitions and parsing using Clap
// ABOUTME: Defines the main CLI structure and subcommands for caravan

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "caravan")]
#[command(about = "A workflow engine that runs command tasks over a dependency DAG")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Disable colored output")]
    pub no_color: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute a workflow from a YAML file
    Run {
        #[arg(long, help = "Path to workflow YAML config file")]
        config: PathBuf,
    },

    /// Load and validate a workflow file without executing it
    Validate {
        #[arg(long, help = "Path to workflow YAML config file")]
        config: PathBuf,
    },

    /// List registered backends and their availability
    Backends,
}

impl Args {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
