//! CLI command definitions

use clap::{Args, Subcommand};

/// Validate a pipeline configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Inspect stored checkpoints
#[derive(Debug, Args, Clone)]
pub struct CheckpointsCommand {
    #[command(subcommand)]
    pub action: CheckpointsAction,
}

#[derive(Debug, Subcommand, Clone)]
pub enum CheckpointsAction {
    /// List checkpoints across all sinks
    List(ListCheckpointsCommand),

    /// Show the checkpoint of one run
    Show(ShowCheckpointCommand),
}

#[derive(Debug, Args, Clone)]
pub struct ListCheckpointsCommand {
    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args, Clone)]
pub struct ShowCheckpointCommand {
    /// Namespace (pipeline id) of the run
    pub namespace: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}
