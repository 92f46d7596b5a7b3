//! Checkpoint store - snapshots shared state to every configured sink

use crate::core::{config::EngineConfig, context::SharedStateStore, error::Advisory};
use crate::persistence::{
    Checkpoint, CheckpointSink, CheckpointSummary, FileCheckpointSink, SinkError,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Sinks that accepted a checkpoint
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointReport {
    pub namespace: String,
    pub stage_index: usize,
    pub written: Vec<String>,
}

/// A sink that rejected a checkpoint
#[derive(Debug, Clone, PartialEq)]
pub struct SinkFailure {
    pub sink: String,
    pub error: String,
}

/// Checkpoint write problems. Callers log these; they never stop a run.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CheckpointError {
    #[error("checkpoint for '{}' failed on {} sink(s): {}", .report.namespace, .failures.len(), describe(.failures))]
    Partial {
        report: CheckpointReport,
        failures: Vec<SinkFailure>,
    },

    #[error("no checkpoint sinks configured for '{0}'")]
    NoSinks(String),
}

fn describe(failures: &[SinkFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.sink, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Progress marker recovered by [`CheckpointStore::restore`]
#[derive(Debug, Clone, PartialEq)]
pub struct RestoredCheckpoint {
    pub stage_index: usize,
    pub stage_name: String,
    pub checkpointed_at: DateTime<Utc>,
    /// Sink the checkpoint came from
    pub sink: String,
}

/// Writes namespace snapshots to one or more sinks and restores them.
///
/// Sinks are kept ordered by descending priority, which is the order they
/// are read in on restore.
pub struct CheckpointStore {
    state: Arc<SharedStateStore>,
    sinks: Vec<Arc<dyn CheckpointSink>>,
}

impl CheckpointStore {
    pub fn new(state: Arc<SharedStateStore>) -> Self {
        Self {
            state,
            sinks: Vec::new(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn CheckpointSink>) -> Self {
        self.sinks.push(sink);
        // Stable: equal priorities keep insertion order
        self.sinks.sort_by_key(|s| std::cmp::Reverse(s.priority()));
        self
    }

    /// Build the sinks described by the engine configuration: the local
    /// file sink always, plus SQLite when `database_url` is set and reachable.
    /// An unreachable database is logged and the store runs on the local sink.
    pub async fn from_config(
        config: &EngineConfig,
        state: Arc<SharedStateStore>,
    ) -> Result<Self, SinkError> {
        let local = FileCheckpointSink::new(&config.checkpoint_dir)?;
        let store = Self::new(state).with_sink(Arc::new(local));

        match &config.database_url {
            #[cfg(feature = "sqlite")]
            Some(url) => match crate::persistence::SqliteCheckpointSink::connect(url).await {
                Ok(remote) => Ok(store.with_sink(Arc::new(remote))),
                Err(e) => {
                    warn!(
                        "Checkpoint database {} unavailable, using local sink only: {}",
                        url, e
                    );
                    Ok(store)
                }
            },
            #[cfg(not(feature = "sqlite"))]
            Some(url) => {
                warn!("Ignoring database_url {} (built without sqlite support)", url);
                Ok(store)
            }
            None => Ok(store),
        }
    }

    /// Names of the configured sinks in read order
    pub fn sink_names(&self) -> Vec<String> {
        self.sinks.iter().map(|s| s.name().to_string()).collect()
    }

    /// Snapshot `namespace` after stage `stage_index` completed.
    ///
    /// Every sink is attempted independently; the result only says which
    /// ones failed.
    pub async fn checkpoint(
        &self,
        namespace: &str,
        stage_index: usize,
        stage_name: &str,
    ) -> Advisory<CheckpointReport, CheckpointError> {
        if self.sinks.is_empty() {
            return Err(CheckpointError::NoSinks(namespace.to_string()));
        }

        let data = self.state.get_all(namespace).await;
        let checkpoint = Checkpoint::new(namespace, stage_index, stage_name, data);

        let mut report = CheckpointReport {
            namespace: namespace.to_string(),
            stage_index,
            written: Vec::new(),
        };
        let mut failures = Vec::new();

        for sink in &self.sinks {
            match sink.write(&checkpoint).await {
                Ok(()) => report.written.push(sink.name().to_string()),
                Err(e) => {
                    warn!(
                        "Checkpoint write to {} failed for {} at stage {}: {}",
                        sink.name(),
                        namespace,
                        stage_index,
                        e
                    );
                    failures.push(SinkFailure {
                        sink: sink.name().to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        debug!(
            "Checkpointed {} at stage {} ({}) to {:?}",
            namespace, stage_index, stage_name, report.written
        );

        if failures.is_empty() {
            Ok(report)
        } else {
            Err(CheckpointError::Partial { report, failures })
        }
    }

    /// Read the checkpoint for `namespace` without touching shared state
    pub async fn load(&self, namespace: &str) -> Option<(Checkpoint, String)> {
        self.load_within(namespace, usize::MAX).await
    }

    /// Like [`load`](Self::load), but a checkpoint whose stage index is not
    /// below `stage_count` is treated as corrupt and the next sink is tried
    pub async fn load_within(
        &self,
        namespace: &str,
        stage_count: usize,
    ) -> Option<(Checkpoint, String)> {
        for sink in &self.sinks {
            match sink.read(namespace).await {
                Ok(Some(checkpoint)) if checkpoint.namespace != namespace => {
                    warn!(
                        "Sink {} returned checkpoint for {} when asked for {}",
                        sink.name(),
                        checkpoint.namespace,
                        namespace
                    );
                }
                Ok(Some(checkpoint)) if checkpoint.stage_index >= stage_count => {
                    warn!(
                        "Ignoring checkpoint for {} from {}: stage index {} out of range ({} stages)",
                        namespace,
                        sink.name(),
                        checkpoint.stage_index,
                        stage_count
                    );
                }
                Ok(Some(checkpoint)) => return Some((checkpoint, sink.name().to_string())),
                Ok(None) => debug!("No checkpoint for {} in {}", namespace, sink.name()),
                Err(e) => warn!(
                    "Reading checkpoint for {} from {} failed: {}",
                    namespace,
                    sink.name(),
                    e
                ),
            }
        }
        None
    }

    /// Restore `namespace` into shared state from the first sink that has it
    pub async fn restore(&self, namespace: &str) -> Option<RestoredCheckpoint> {
        self.restore_within(namespace, usize::MAX).await
    }

    /// Restore from the first sink holding a checkpoint for a pipeline of
    /// `stage_count` stages (see [`load_within`](Self::load_within))
    pub async fn restore_within(
        &self,
        namespace: &str,
        stage_count: usize,
    ) -> Option<RestoredCheckpoint> {
        let (checkpoint, sink) = self.load_within(namespace, stage_count).await?;

        for (key, value) in checkpoint.data {
            self.state.set(namespace, &key, value).await;
        }

        info!(
            "Restored {} from {} at stage {} ({})",
            namespace, sink, checkpoint.stage_index, checkpoint.stage_name
        );

        Some(RestoredCheckpoint {
            stage_index: checkpoint.stage_index,
            stage_name: checkpoint.stage_name,
            checkpointed_at: checkpoint.checkpointed_at,
            sink,
        })
    }

    /// Every checkpoint any sink knows about, newest first. A namespace
    /// stored in several sinks is listed once per sink.
    pub async fn list_checkpoints(&self) -> Vec<CheckpointSummary> {
        let mut all = Vec::new();
        for sink in &self.sinks {
            match sink.list().await {
                Ok(entries) => all.extend(entries),
                Err(e) => warn!("Listing checkpoints from {} failed: {}", sink.name(), e),
            }
        }
        all.sort_by(|a, b| b.checkpointed_at.cmp(&a.checkpointed_at));
        all
    }
}

impl std::fmt::Debug for CheckpointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointStore")
            .field("sinks", &self.sink_names())
            .finish()
    }
}
