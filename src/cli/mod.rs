//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{CheckpointsCommand, ValidateCommand};
use std::ffi::OsString;

/// Operator tool for stagehand pipelines
#[derive(Debug, Parser, Clone)]
#[command(name = "stagehand")]
#[command(author = "Stagehand Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Inspect stagehand pipeline files and run checkpoints", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to engine configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Validate a pipeline configuration
    Validate(ValidateCommand),

    /// Inspect stored checkpoints
    Checkpoints(CheckpointsCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
