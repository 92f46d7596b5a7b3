//! Persistence layer for run checkpoints

pub mod checkpoint;
pub mod file;

#[cfg(feature = "sqlite")]
pub mod store;

pub use checkpoint::{CheckpointError, CheckpointReport, CheckpointStore, RestoredCheckpoint};
pub use file::FileCheckpointSink;

#[cfg(feature = "sqlite")]
pub use store::SqliteCheckpointSink;

use crate::core::stage::StateSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

/// Snapshot of a namespace after a completed stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub namespace: String,

    /// Index of the last completed stage
    pub stage_index: usize,

    pub stage_name: String,

    /// Full shared state of the namespace
    pub data: StateSnapshot,

    pub checkpointed_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(
        namespace: impl Into<String>,
        stage_index: usize,
        stage_name: impl Into<String>,
        data: StateSnapshot,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            stage_index,
            stage_name: stage_name.into(),
            data,
            checkpointed_at: Utc::now(),
        }
    }
}

/// Listing entry for a stored checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointSummary {
    pub namespace: String,
    pub stage_index: usize,
    pub stage_name: String,
    pub checkpointed_at: DateTime<Utc>,

    /// Sink the entry was read from
    pub sink: String,
}

impl CheckpointSummary {
    pub fn from_checkpoint(checkpoint: &Checkpoint, sink: &str) -> Self {
        Self {
            namespace: checkpoint.namespace.clone(),
            stage_index: checkpoint.stage_index,
            stage_name: checkpoint.stage_name.clone(),
            checkpointed_at: checkpoint.checkpointed_at,
            sink: sink.to_string(),
        }
    }
}

/// Errors raised at the sink boundary
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "sqlite")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt checkpoint for '{namespace}': {reason}")]
    Corrupt { namespace: String, reason: String },
}

/// A place checkpoints can be written to and read back from
#[async_trait::async_trait]
pub trait CheckpointSink: Send + Sync {
    /// Short name used in logs and listings
    fn name(&self) -> &str;

    /// Higher priority sinks are read first on restore
    fn priority(&self) -> i32 {
        0
    }

    /// Insert or replace the checkpoint for its namespace
    async fn write(&self, checkpoint: &Checkpoint) -> Result<(), SinkError>;

    /// Read the checkpoint for a namespace, if any
    async fn read(&self, namespace: &str) -> Result<Option<Checkpoint>, SinkError>;

    /// Summaries of every stored checkpoint
    async fn list(&self) -> Result<Vec<CheckpointSummary>, SinkError>;
}

/// In-memory sink (for testing or ephemeral use)
pub struct InMemoryCheckpointSink {
    name: String,
    priority: i32,
    checkpoints: RwLock<HashMap<String, Checkpoint>>,
}

impl InMemoryCheckpointSink {
    pub fn new() -> Self {
        Self::named("memory")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: 0,
            checkpoints: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Number of namespaces stored
    pub async fn len(&self) -> usize {
        self.checkpoints.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.checkpoints.read().await.is_empty()
    }
}

impl Default for InMemoryCheckpointSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CheckpointSink for InMemoryCheckpointSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn write(&self, checkpoint: &Checkpoint) -> Result<(), SinkError> {
        let mut checkpoints = self.checkpoints.write().await;
        checkpoints.insert(checkpoint.namespace.clone(), checkpoint.clone());
        Ok(())
    }

    async fn read(&self, namespace: &str) -> Result<Option<Checkpoint>, SinkError> {
        let checkpoints = self.checkpoints.read().await;
        Ok(checkpoints.get(namespace).cloned())
    }

    async fn list(&self) -> Result<Vec<CheckpointSummary>, SinkError> {
        let checkpoints = self.checkpoints.read().await;
        Ok(checkpoints
            .values()
            .map(|cp| CheckpointSummary::from_checkpoint(cp, &self.name))
            .collect())
    }
}
