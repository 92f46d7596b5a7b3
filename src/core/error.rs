//! Pipeline error types

use crate::core::state::RunSummary;
use crate::executor::ExecutorError;
use thiserror::Error;

/// Result of a best-effort side channel (checkpoint writes, event delivery).
///
/// An `Err` here is a warning for the caller to surface, never a signal to
/// stop orchestration.
pub type Advisory<T, E> = Result<T, E>;

/// Errors that cross the `execute_pipeline` boundary
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Pipeline not found: {0}")]
    UnknownPipeline(String),

    #[error("Stage '{stage}' references unregistered executor '{executor_id}'")]
    UnknownExecutor { stage: String, executor_id: String },

    #[error("Invalid pipeline definition: {0}")]
    InvalidDefinition(String),

    /// A required stage failed after exhausting its retries
    #[error("Stage '{stage}' failed (resume with {pipeline_id}): {source}")]
    StageFailed {
        pipeline_id: String,
        stage: String,
        #[source]
        source: ExecutorError,
        summary: Box<RunSummary>,
    },
}

impl PipelineError {
    /// Identifier to pass back as `resume`, when the run got far enough to have one
    pub fn pipeline_id(&self) -> Option<&str> {
        match self {
            PipelineError::StageFailed { pipeline_id, .. } => Some(pipeline_id),
            _ => None,
        }
    }

    /// Summary of the failed run, when one was started
    pub fn summary(&self) -> Option<&RunSummary> {
        match self {
            PipelineError::StageFailed { summary, .. } => Some(summary),
            _ => None,
        }
    }
}
