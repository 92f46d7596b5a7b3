//! Run state models

use crate::core::stage::StateSnapshot;
use crate::executor::TokenUsage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;

/// Overall run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Stages are still being driven
    Running,
    /// Cost budget reached; resumable once the budget is raised
    PausedCost,
    /// Every stage ran (optional failures allowed)
    Completed,
    /// A required stage failed
    Failed,
    /// Stopped through the cancellation token; resumable
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }

    /// Whether passing the pipeline id back as `resume` makes sense
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            RunStatus::PausedCost | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

/// Outcome of one successful stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageResult {
    pub executor_id: String,
    pub output_preview: String,
    pub duration_ms: u64,
    pub attempts: usize,
    pub cost: f64,
    /// Token usage of the successful attempt, when the executor reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenUsage>,
}

/// A stage failure recorded in the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageErrorRecord {
    pub stage: String,
    pub error: String,
}

/// Summary reported at the end of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub status: RunStatus,
    pub stage_results: HashMap<String, StageResult>,
    pub errors: Vec<StageErrorRecord>,
    pub total_cost: f64,
    pub duration_ms: u64,
}

impl RunSummary {
    pub fn empty(status: RunStatus) -> Self {
        Self {
            status,
            stage_results: HashMap::new(),
            errors: Vec::new(),
            total_cost: 0.0,
            duration_ms: 0,
        }
    }
}

/// Value returned by a run that did not fail
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub run_id: String,
    pub pipeline_id: String,
    /// Full shared state of the run's namespace
    pub results: StateSnapshot,
    pub stats: RunSummary,
}

/// One execution attempt of a pipeline definition
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub run_id: String,
    pub pipeline_id: String,
    pub namespace: String,
    pub status: RunStatus,
    pub stage_results: HashMap<String, StageResult>,
    pub errors: Vec<StageErrorRecord>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    cost: f64,
    clock: Instant,
}

impl PipelineRun {
    /// Start a run; the namespace is the pipeline id
    pub fn new(run_id: impl Into<String>, pipeline_id: impl Into<String>) -> Self {
        let pipeline_id = pipeline_id.into();
        Self {
            run_id: run_id.into(),
            namespace: pipeline_id.clone(),
            pipeline_id,
            status: RunStatus::Running,
            stage_results: HashMap::new(),
            errors: Vec::new(),
            started_at: Utc::now(),
            duration_ms: 0,
            cost: 0.0,
            clock: Instant::now(),
        }
    }

    /// Add spend to the accumulator. Negative or non-finite amounts are
    /// ignored so the accumulator never decreases.
    pub fn add_cost(&mut self, amount: f64) {
        if amount.is_finite() && amount > 0.0 {
            self.cost += amount;
        }
    }

    pub fn total_cost(&self) -> f64 {
        self.cost
    }

    pub fn record_success(&mut self, stage: &str, result: StageResult) {
        self.stage_results.insert(stage.to_string(), result);
    }

    pub fn record_error(&mut self, stage: &str, error: impl Into<String>) {
        self.errors.push(StageErrorRecord {
            stage: stage.to_string(),
            error: error.into(),
        });
    }

    /// Move to a terminal status and stamp the duration
    pub fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.duration_ms = self.clock.elapsed().as_millis() as u64;
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            status: self.status,
            stage_results: self.stage_results.clone(),
            errors: self.errors.clone(),
            total_cost: self.cost,
            duration_ms: self.duration_ms,
        }
    }
}

/// Truncate output for summaries, appending `...` when something was cut
pub fn output_preview(output: &str, max_chars: usize) -> String {
    let mut chars = output.char_indices();
    match chars.nth(max_chars) {
        Some((byte_index, _)) => format!("{}...", &output[..byte_index]),
        None => output.to_string(),
    }
}

/// Generate a short run id
pub fn new_run_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..10].to_string()
}

/// Pipeline ids have the form `<pipeline name>_<run id>`
pub fn pipeline_id_for(pipeline_name: &str, run_id: &str) -> String {
    format!("{}_{}", pipeline_name, run_id)
}

/// Recover the run id from a pipeline id
pub fn run_id_from(pipeline_id: &str) -> &str {
    pipeline_id
        .rsplit_once('_')
        .map_or(pipeline_id, |(_, run_id)| run_id)
}
