//! Pipeline execution engine

pub mod engine;
pub mod runner;

pub use engine::{Orchestrator, RunOptions, INPUT_KEY};
pub use runner::{RunScope, StageOutcome, StageRunner};
