//! Stage runner - invokes a stage's executor with retries and timeouts

use crate::{
    core::{context::SharedStateStore, stage::Stage},
    events::{EventBus, EventDraft, EventKind, SUPERVISOR_CHANNEL},
    executor::{CancellationToken, Executor, ExecutorError, StageContext, TokenUsage},
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Per-run values every stage invocation needs
#[derive(Debug, Clone)]
pub struct RunScope {
    pub pipeline_id: String,
    pub namespace: String,
    pub input: Arc<Value>,
    pub cancel: CancellationToken,
}

/// What happened when a stage was invoked
#[derive(Debug, Clone)]
pub struct StageOutcome {
    /// Output of the successful attempt, or the error of the last one
    pub result: Result<String, ExecutorError>,
    pub attempts: usize,
    pub cost: f64,
    pub usage: Option<TokenUsage>,
    pub duration: Duration,
}

/// Runs single stages. Cheap to clone so parallel members can own one.
#[derive(Debug, Clone)]
pub struct StageRunner {
    state: Arc<SharedStateStore>,
    bus: Arc<EventBus>,
}

impl StageRunner {
    pub fn new(state: Arc<SharedStateStore>, bus: Arc<EventBus>) -> Self {
        Self { state, bus }
    }

    /// Invoke `stage` up to `retries + 1` times (saturating).
    ///
    /// The task is rebuilt from the current namespace before every attempt.
    /// Cancellation is never retried.
    pub async fn run(
        &self,
        executor: Arc<dyn Executor>,
        stage: &Stage,
        scope: &RunScope,
    ) -> StageOutcome {
        let started = Instant::now();
        let max_attempts = stage.retries.saturating_add(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let snapshot = self.state.get_all(&scope.namespace).await;
            let task = stage.build_task(&snapshot, &scope.input);
            let ctx = StageContext {
                namespace: scope.namespace.clone(),
                stage_name: stage.name.clone(),
                response_format: stage.response_format.clone(),
                attempt,
                cancel: scope.cancel.clone(),
            };

            info!(
                "Running stage {} on {} (attempt {}/{})",
                stage.name, stage.executor_id, attempt, max_attempts
            );
            debug!("Task for stage {}: {}", stage.name, task.prompt);
            self.emit_task(stage, scope, attempt, &task.prompt);

            let call = executor.execute(&task, &ctx);
            let result = match stage.timeout {
                Some(limit) => match timeout(limit, call).await {
                    Ok(result) => result,
                    Err(_) => Err(ExecutorError::Timeout(limit)),
                },
                None => call.await,
            };

            let error = match result {
                Ok(response) => {
                    return StageOutcome {
                        result: Ok(response.content),
                        attempts: attempt,
                        cost: response.cost,
                        usage: response.usage,
                        duration: started.elapsed(),
                    };
                }
                Err(error) => error,
            };

            let retryable = !matches!(error, ExecutorError::Cancelled)
                && !scope.cancel.is_cancelled()
                && attempt < max_attempts;

            if !retryable {
                return StageOutcome {
                    result: Err(error),
                    attempts: attempt,
                    cost: 0.0,
                    usage: None,
                    duration: started.elapsed(),
                };
            }

            warn!(
                "Stage {} failed (attempt {}/{}), retrying: {}",
                stage.name, attempt, max_attempts, error
            );
        }
    }

    fn emit_task(&self, stage: &Stage, scope: &RunScope, attempt: usize, prompt: &str) {
        let draft = EventDraft::direct(
            SUPERVISOR_CHANNEL,
            stage.executor_id.as_str(),
            EventKind::Task,
            json!({
                "pipelineId": scope.pipeline_id,
                "stage": stage.name,
                "attempt": attempt,
                "responseFormat": stage.response_format,
                "prompt": prompt,
            }),
        );
        if let Err(e) = self.bus.send(draft) {
            warn!("Task event for stage {} not fully delivered: {}", stage.name, e);
        }
    }
}
