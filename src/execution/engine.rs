//! Main execution engine - orchestrates pipeline runs

use crate::{
    core::{
        config::EngineConfig,
        context::SharedStateStore,
        error::PipelineError,
        pipeline::PipelineDefinition,
        stage::Stage,
        state::{
            new_run_id, output_preview, pipeline_id_for, run_id_from, PipelineRun, RunResult,
            RunStatus, StageResult,
        },
    },
    events::{EventBus, EventDraft, EventKind, SUPERVISOR_CHANNEL},
    execution::runner::{RunScope, StageOutcome, StageRunner},
    executor::{CancellationToken, Executor, ExecutorError},
    persistence::CheckpointStore,
};
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Key the run input is stored under in a fresh namespace
pub const INPUT_KEY: &str = "input";

/// Options for a single `execute_pipeline` call
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Pipeline id of an earlier run to continue
    pub resume: Option<String>,

    /// Cost ceiling; falls back to the engine configuration
    pub max_cost: Option<f64>,

    /// Token checked between stages and handed to executors
    pub cancel: Option<CancellationToken>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resume(mut self, pipeline_id: impl Into<String>) -> Self {
        self.resume = Some(pipeline_id.into());
        self
    }

    pub fn with_max_cost(mut self, max_cost: f64) -> Self {
        self.max_cost = Some(max_cost);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// How a parallel group settled
enum GroupOutcome {
    Completed,
    Failed { index: usize, error: ExecutorError },
    Cancelled,
}

/// Drives pipeline definitions against registered executors.
///
/// Shared state, checkpoints and events are injected so several
/// orchestrators (or tests) can share or isolate them as needed.
pub struct Orchestrator {
    executors: HashMap<String, Arc<dyn Executor>>,
    pipelines: HashMap<String, Arc<PipelineDefinition>>,
    state: Arc<SharedStateStore>,
    checkpoints: Arc<CheckpointStore>,
    bus: Arc<EventBus>,
    runner: StageRunner,
    config: EngineConfig,
}

impl Orchestrator {
    pub fn new(
        state: Arc<SharedStateStore>,
        checkpoints: Arc<CheckpointStore>,
        bus: Arc<EventBus>,
        config: EngineConfig,
    ) -> Self {
        let runner = StageRunner::new(Arc::clone(&state), Arc::clone(&bus));
        Self {
            executors: HashMap::new(),
            pipelines: HashMap::new(),
            state,
            checkpoints,
            bus,
            runner,
            config,
        }
    }

    /// Bind an executor id. Re-registering an id replaces the executor.
    pub fn register_executor(&mut self, id: impl Into<String>, executor: Arc<dyn Executor>) {
        let id = id.into();
        if self.executors.insert(id.clone(), executor).is_some() {
            warn!("Replacing executor {}", id);
        } else {
            debug!("Registered executor {}", id);
        }
    }

    /// Register a pipeline definition under its name
    pub fn register_pipeline(&mut self, definition: PipelineDefinition) -> Result<(), PipelineError> {
        definition.validate()?;
        info!(
            "Registered pipeline {} ({} stages)",
            definition.name,
            definition.stages.len()
        );
        self.pipelines
            .insert(definition.name.clone(), Arc::new(definition));
        Ok(())
    }

    /// Names of registered pipelines, sorted
    pub fn pipelines(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pipelines.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn state(&self) -> &Arc<SharedStateStore> {
        &self.state
    }

    pub fn checkpoints(&self) -> &Arc<CheckpointStore> {
        &self.checkpoints
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Run (or resume) a registered pipeline.
    ///
    /// Returns `Ok` for completed, paused and cancelled runs; the status is in
    /// `stats`. Only a failed required stage, or a problem found before the
    /// first stage, is an `Err`.
    pub async fn execute_pipeline(
        &self,
        pipeline_name: &str,
        input: Value,
        options: RunOptions,
    ) -> Result<RunResult, PipelineError> {
        let definition = self
            .pipelines
            .get(pipeline_name)
            .cloned()
            .ok_or_else(|| PipelineError::UnknownPipeline(pipeline_name.to_string()))?;
        let executors = self.bind_executors(&definition)?;

        let (run_id, pipeline_id) = match &options.resume {
            Some(pipeline_id) => (run_id_from(pipeline_id).to_string(), pipeline_id.clone()),
            None => {
                let run_id = new_run_id();
                let pipeline_id = pipeline_id_for(&definition.name, &run_id);
                (run_id, pipeline_id)
            }
        };
        let mut run = PipelineRun::new(run_id, pipeline_id);
        let max_cost = options.max_cost.or(self.config.max_cost);
        let scope = RunScope {
            pipeline_id: run.pipeline_id.clone(),
            namespace: run.namespace.clone(),
            input: Arc::new(input),
            cancel: options.cancel.clone().unwrap_or_default(),
        };

        let start = match &options.resume {
            Some(pipeline_id) => match self
                .checkpoints
                .restore_within(&run.namespace, definition.stages.len())
                .await
            {
                Some(restored) => {
                    info!(
                        "Resuming {} after stage {} ({})",
                        pipeline_id, restored.stage_index, restored.stage_name
                    );
                    restored.stage_index + 1
                }
                None => {
                    warn!("No checkpoint found for {}, starting from the beginning", pipeline_id);
                    0
                }
            },
            None => 0,
        };

        if start == 0 {
            self.state
                .set(&run.namespace, INPUT_KEY, scope.input.as_ref().clone())
                .await;
        }

        info!(
            "Starting pipeline {} as {} at stage {}/{}",
            definition.name,
            run.pipeline_id,
            start,
            definition.stages.len()
        );
        self.emit(EventDraft::broadcast(
            SUPERVISOR_CHANNEL,
            EventKind::Status,
            json!({
                "pipeline": definition.name,
                "pipelineId": run.pipeline_id,
                "runId": run.run_id,
                "status": RunStatus::Running,
                "startIndex": start,
                "resumed": options.resume.is_some(),
            }),
        ));

        let stages = &definition.stages;
        let mut i = start;
        while i < stages.len() {
            if scope.cancel.is_cancelled() {
                info!("Pipeline {} cancelled before stage {}", run.pipeline_id, stages[i].name);
                self.checkpoint_before(&run, &definition, i).await;
                return Ok(self.finish(run, RunStatus::Cancelled).await);
            }

            if let Some(limit) = max_cost {
                if run.total_cost() >= limit {
                    warn!(
                        "Cost budget reached for {} ({:.4} >= {:.4}), pausing before stage {}",
                        run.pipeline_id,
                        run.total_cost(),
                        limit,
                        stages[i].name
                    );
                    self.checkpoint_before(&run, &definition, i).await;
                    return Ok(self.finish(run, RunStatus::PausedCost).await);
                }
            }

            // Guard before grouping: a skipped first member never opens a group
            let stage = &stages[i];
            let snapshot = self.state.get_all(&run.namespace).await;
            if !stage.should_run(&snapshot) {
                info!("Skipping stage {}: condition not met", stage.name);
                i += 1;
                continue;
            }

            let group_end = definition.parallel_group_end(i);
            if group_end - i > 1 {
                match self
                    .run_group(&definition, i, group_end, &executors, &scope, &mut run)
                    .await
                {
                    GroupOutcome::Completed => {
                        let last = group_end - 1;
                        self.checkpoint(&run.namespace, last, &stages[last].name).await;
                        i = group_end;
                        continue;
                    }
                    GroupOutcome::Cancelled => {
                        self.checkpoint_before(&run, &definition, i).await;
                        return Ok(self.finish(run, RunStatus::Cancelled).await);
                    }
                    GroupOutcome::Failed { index, error } => {
                        self.checkpoint_before(&run, &definition, i).await;
                        return Err(self.fail(run, &stages[index], error).await);
                    }
                }
            }

            let outcome = self
                .runner
                .run(Arc::clone(&executors[i]), stage, &scope)
                .await;

            match self.settle(stage, outcome, &scope, &mut run).await {
                Ok(()) => {
                    self.checkpoint(&run.namespace, i, &stage.name).await;
                }
                Err(ExecutorError::Cancelled) if scope.cancel.is_cancelled() => {
                    self.checkpoint_before(&run, &definition, i).await;
                    return Ok(self.finish(run, RunStatus::Cancelled).await);
                }
                Err(error) if stage.required => {
                    self.checkpoint_before(&run, &definition, i).await;
                    return Err(self.fail(run, stage, error).await);
                }
                Err(_) => {}
            }

            i += 1;
        }

        Ok(self.finish(run, RunStatus::Completed).await)
    }

    /// Resolve every stage's executor up front
    fn bind_executors(
        &self,
        definition: &PipelineDefinition,
    ) -> Result<Vec<Arc<dyn Executor>>, PipelineError> {
        definition
            .stages
            .iter()
            .map(|stage| {
                self.executors
                    .get(&stage.executor_id)
                    .cloned()
                    .ok_or_else(|| PipelineError::UnknownExecutor {
                        stage: stage.name.clone(),
                        executor_id: stage.executor_id.clone(),
                    })
            })
            .collect()
    }

    /// Dispatch the group `[start, end)` concurrently and wait for every
    /// member to settle
    async fn run_group(
        &self,
        definition: &PipelineDefinition,
        start: usize,
        end: usize,
        executors: &[Arc<dyn Executor>],
        scope: &RunScope,
        run: &mut PipelineRun,
    ) -> GroupOutcome {
        let snapshot = self.state.get_all(&run.namespace).await;
        let mut join_set = JoinSet::new();
        let mut pending = BTreeSet::new();

        for index in start..end {
            let stage = &definition.stages[index];
            if !stage.should_run(&snapshot) {
                info!("Skipping parallel stage {}: condition not met", stage.name);
                continue;
            }

            pending.insert(index);
            let runner = self.runner.clone();
            let executor = Arc::clone(&executors[index]);
            let stage = stage.clone();
            let scope = scope.clone();
            join_set.spawn(async move {
                let outcome = runner.run(executor, &stage, &scope).await;
                (index, outcome)
            });
        }

        info!(
            "Running {} parallel stage(s) [{}..{})",
            pending.len(),
            start,
            end
        );

        let mut failed: Option<(usize, ExecutorError)> = None;
        let mut cancelled = false;

        let mut record = |index: usize, error: ExecutorError, failed: &mut Option<(usize, ExecutorError)>| {
            if matches!(error, ExecutorError::Cancelled) && scope.cancel.is_cancelled() {
                cancelled = true;
            } else if definition.stages[index].required && failed.is_none() {
                *failed = Some((index, error));
            }
        };

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, outcome)) => {
                    pending.remove(&index);
                    let stage = &definition.stages[index];
                    if let Err(error) = self.settle(stage, outcome, scope, run).await {
                        record(index, error, &mut failed);
                    }
                }
                Err(join_err) => {
                    error!("Parallel stage task panicked: {}", join_err);
                }
            }
        }

        // Whatever is still pending panicked
        for index in std::mem::take(&mut pending) {
            let stage = &definition.stages[index];
            let error = ExecutorError::Internal(format!("stage {} panicked", stage.name));
            self.record_failure(stage, &error, scope, run);
            record(index, error, &mut failed);
        }

        if cancelled {
            GroupOutcome::Cancelled
        } else if let Some((index, error)) = failed {
            GroupOutcome::Failed { index, error }
        } else {
            GroupOutcome::Completed
        }
    }

    /// Apply a stage outcome to the run: store output and results on
    /// success, record and publish the error otherwise
    async fn settle(
        &self,
        stage: &Stage,
        outcome: StageOutcome,
        scope: &RunScope,
        run: &mut PipelineRun,
    ) -> Result<(), ExecutorError> {
        run.add_cost(outcome.cost);

        let output = match outcome.result {
            Ok(output) => output,
            Err(ExecutorError::Cancelled) if scope.cancel.is_cancelled() => {
                info!("Stage {} stopped by cancellation", stage.name);
                return Err(ExecutorError::Cancelled);
            }
            Err(error) => {
                self.record_failure(stage, &error, scope, run);
                return Err(error);
            }
        };

        let namespace = &run.namespace;
        self.state
            .set(namespace, &stage.output_key, Value::String(output.clone()))
            .await;

        if let Some(processed) = stage.post_process(&output, &self.state.get_all(namespace).await) {
            self.state
                .set(namespace, &stage.processed_key(), processed)
                .await;
        }

        let preview = output_preview(&output, self.config.output_preview_chars);
        info!(
            "Stage {} completed in {}ms ({} attempt(s))",
            stage.name,
            outcome.duration.as_millis(),
            outcome.attempts
        );

        self.emit(EventDraft::direct(
            stage.executor_id.as_str(),
            SUPERVISOR_CHANNEL,
            EventKind::Result,
            json!({
                "pipelineId": run.pipeline_id,
                "stage": stage.name,
                "outputKey": stage.output_key,
                "attempts": outcome.attempts,
                "cost": outcome.cost,
                "tokens": outcome.usage,
                "preview": preview,
            }),
        ));

        run.record_success(
            &stage.name,
            StageResult {
                executor_id: stage.executor_id.clone(),
                output_preview: preview,
                duration_ms: outcome.duration.as_millis() as u64,
                attempts: outcome.attempts,
                cost: outcome.cost,
                tokens: outcome.usage,
            },
        );

        Ok(())
    }

    fn record_failure(
        &self,
        stage: &Stage,
        error: &ExecutorError,
        scope: &RunScope,
        run: &mut PipelineRun,
    ) {
        if stage.required {
            error!("Required stage {} failed: {}", stage.name, error);
        } else {
            warn!("Optional stage {} failed, continuing: {}", stage.name, error);
        }

        run.record_error(&stage.name, error.to_string());
        self.emit(EventDraft::direct(
            stage.executor_id.as_str(),
            SUPERVISOR_CHANNEL,
            EventKind::Error,
            json!({
                "pipelineId": scope.pipeline_id,
                "stage": stage.name,
                "required": stage.required,
                "error": error.to_string(),
            }),
        ));
    }

    /// Checkpoint the last stage before `index`; nothing completed before 0
    async fn checkpoint_before(&self, run: &PipelineRun, definition: &PipelineDefinition, index: usize) {
        match index.checked_sub(1) {
            Some(previous) => {
                self.checkpoint(&run.namespace, previous, &definition.stages[previous].name)
                    .await
            }
            None => debug!("Nothing to checkpoint for {} before stage 0", run.namespace),
        }
    }

    async fn checkpoint(&self, namespace: &str, index: usize, stage_name: &str) {
        if let Err(e) = self.checkpoints.checkpoint(namespace, index, stage_name).await {
            warn!("{}", e);
        }
    }

    async fn finish(&self, mut run: PipelineRun, status: RunStatus) -> RunResult {
        run.finish(status);
        self.emit_status(&run);

        info!(
            "Pipeline {} finished: {:?} (cost {:.4}, {}ms)",
            run.pipeline_id,
            status,
            run.total_cost(),
            run.duration_ms
        );

        RunResult {
            results: self.state.get_all(&run.namespace).await,
            stats: run.summary(),
            run_id: run.run_id,
            pipeline_id: run.pipeline_id,
        }
    }

    async fn fail(&self, mut run: PipelineRun, stage: &Stage, error: ExecutorError) -> PipelineError {
        run.finish(RunStatus::Failed);
        self.emit_status(&run);

        error!(
            "Pipeline {} failed at stage {}; resume with {}",
            run.pipeline_id, stage.name, run.pipeline_id
        );

        PipelineError::StageFailed {
            summary: Box::new(run.summary()),
            pipeline_id: run.pipeline_id,
            stage: stage.name.clone(),
            source: error,
        }
    }

    fn emit_status(&self, run: &PipelineRun) {
        self.emit(EventDraft::broadcast(
            SUPERVISOR_CHANNEL,
            EventKind::Status,
            json!({
                "pipelineId": run.pipeline_id,
                "runId": run.run_id,
                "status": run.status,
                "totalCost": run.total_cost(),
                "durationMs": run.duration_ms,
                "errors": run.errors.len(),
            }),
        ));
    }

    fn emit(&self, draft: EventDraft) {
        if let Err(e) = self.bus.send(draft) {
            warn!("{}", e);
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut executors: Vec<&String> = self.executors.keys().collect();
        executors.sort();
        f.debug_struct("Orchestrator")
            .field("pipelines", &self.pipelines())
            .field("executors", &executors)
            .field("checkpoints", &self.checkpoints)
            .finish()
    }
}
