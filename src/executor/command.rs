//! Subprocess executor - runs an external program per task

use crate::core::TaskSpec;
use crate::executor::{Executor, ExecutorError, ExecutorResponse, StageContext};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Configuration for a [`CommandExecutor`]
#[derive(Debug, Clone)]
pub struct CommandExecutorConfig {
    /// Program to spawn (looked up on PATH when not absolute)
    pub program: String,

    /// Arguments passed before the task is written to stdin
    pub args: Vec<String>,

    /// Timeout for a single invocation in seconds
    pub timeout_secs: u64,

    /// Flat cost reported for every successful call
    pub cost_per_call: f64,
}

impl CommandExecutorConfig {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout_secs: 10800,
            cost_per_call: 0.0,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_cost_per_call(mut self, cost: f64) -> Self {
        self.cost_per_call = cost;
        self
    }
}

/// Executor that hands the task prompt to a subprocess on stdin and returns
/// its stdout.
///
/// The namespace and response format are exported to the child as
/// `STAGEHAND_NAMESPACE` and `STAGEHAND_RESPONSE_FORMAT`.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    config: CommandExecutorConfig,
}

impl CommandExecutor {
    pub fn new(config: CommandExecutorConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Executor for CommandExecutor {
    async fn execute(
        &self,
        task: &TaskSpec,
        ctx: &StageContext,
    ) -> Result<ExecutorResponse, ExecutorError> {
        debug!(
            "Spawning {} for stage {} (prompt length: {})",
            self.config.program,
            ctx.stage_name,
            task.prompt.len()
        );

        let mut child = Command::new(&self.config.program)
            .args(&self.config.args)
            .env("STAGEHAND_NAMESPACE", &ctx.namespace)
            .env("STAGEHAND_RESPONSE_FORMAT", &ctx.response_format)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ExecutorError::Internal(format!(
                    "Failed to spawn {}: {}",
                    self.config.program, e
                ))
            })?;

        // Feed stdin from a separate task so a chatty child can't deadlock us
        if let Some(mut stdin) = child.stdin.take() {
            let prompt = task.prompt.clone().into_bytes();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&prompt).await {
                    debug!("Child closed stdin early: {}", e);
                }
            });
        }

        let timeout_duration = Duration::from_secs(self.config.timeout_secs);
        let output = tokio::select! {
            result = timeout(timeout_duration, child.wait_with_output()) => {
                result
                    .map_err(|_| ExecutorError::Timeout(timeout_duration))?
                    .map_err(|e| ExecutorError::Internal(format!(
                        "Failed to wait for {}: {}", self.config.program, e
                    )))?
            }
            _ = ctx.cancel.cancelled() => return Err(ExecutorError::Cancelled),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output.status.code().unwrap_or(-1);
            warn!(
                "{} exited with code {}: {}",
                self.config.program,
                exit_code,
                stderr.trim()
            );
            return Err(ExecutorError::Failed(format!(
                "{} exited with code {}: {}",
                self.config.program,
                exit_code,
                stderr.trim()
            )));
        }

        let content = String::from_utf8(output.stdout).map_err(|e| {
            ExecutorError::Internal(format!("Failed to decode output: {}", e))
        })?;

        debug!("{} returned {} bytes of output", self.config.program, content.len());

        Ok(ExecutorResponse::new(content).with_cost(self.config.cost_per_call))
    }
}
