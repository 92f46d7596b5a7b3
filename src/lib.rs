//! stagehand - a checkpointed, budget-aware staged pipeline execution engine

pub mod cli;
pub mod core;
pub mod events;
pub mod execution;
pub mod executor;
pub mod persistence;

// Re-export commonly used types
pub use crate::core::config::{EngineConfig, PipelineConfig};
pub use crate::core::{
    PipelineDefinition, PipelineError, RunResult, RunStatus, RunSummary, SharedStateStore, Stage,
    StateSnapshot, TaskSpec,
};
pub use events::{Event, EventBus, EventDraft, EventKind, Recipient};
pub use execution::{Orchestrator, RunOptions};
pub use executor::{
    CancellationToken, CommandExecutor, CommandExecutorConfig, Executor, ExecutorError,
    ExecutorResponse, StageContext, TokenUsage,
};
pub use persistence::{CheckpointSink, CheckpointStore, FileCheckpointSink, InMemoryCheckpointSink};
