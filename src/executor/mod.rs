//! Executor contract - the external collaborators stages are bound to

pub mod cancel;
pub mod command;
pub mod response;

use crate::core::TaskSpec;
use async_trait::async_trait;
pub use cancel::CancellationToken;
pub use command::{CommandExecutor, CommandExecutorConfig};
pub use response::{ExecutorError, ExecutorResponse, TokenUsage};

/// Per-call context handed to an executor alongside its task
#[derive(Debug, Clone)]
pub struct StageContext {
    /// Namespace of the run the call belongs to
    pub namespace: String,

    /// Stage that issued the call
    pub stage_name: String,

    /// Requested response format (e.g. "text", "json")
    pub response_format: String,

    /// 1-based attempt number within the current invocation
    pub attempt: usize,

    /// Cancellation signal for the owning run
    pub cancel: CancellationToken,
}

/// Trait for stage execution - anything that turns a task into output.
///
/// Implementations may be called more than once for the same logical stage
/// when retries are configured, so they must tolerate repeated invocation.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Execute a task and return its output
    async fn execute(
        &self,
        task: &TaskSpec,
        ctx: &StageContext,
    ) -> Result<ExecutorResponse, ExecutorError>;
}

#[async_trait]
impl<E: Executor + ?Sized> Executor for std::sync::Arc<E> {
    async fn execute(
        &self,
        task: &TaskSpec,
        ctx: &StageContext,
    ) -> Result<ExecutorResponse, ExecutorError> {
        (**self).execute(task, ctx).await
    }
}
