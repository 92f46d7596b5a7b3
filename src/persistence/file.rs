//! Local file sink - one JSON document per namespace

use crate::persistence::{Checkpoint, CheckpointSink, CheckpointSummary, SinkError};
use std::path::{Path, PathBuf};
use tracing::warn;

const EXTENSION: &str = "json";

/// Stores each namespace as `<dir>/<encoded namespace>.json`.
///
/// Writes go to a temporary file in the same directory that is then renamed
/// over the target, so a crash mid-write leaves the previous snapshot intact.
#[derive(Debug, Clone)]
pub struct FileCheckpointSink {
    dir: PathBuf,
}

impl FileCheckpointSink {
    /// Create the sink, creating `dir` if needed
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, SinkError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Path of the snapshot file for `namespace`
    pub fn path_for(&self, namespace: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", encode_namespace(namespace), EXTENSION))
    }

    async fn read_path(path: &Path) -> Result<Option<Checkpoint>, SinkError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Encode a namespace into a file stem. Alphanumerics, `-` and `_` pass
/// through; every other byte becomes `%XX`, so distinct namespaces always map
/// to distinct files and nothing can escape the directory.
pub fn encode_namespace(namespace: &str) -> String {
    let mut encoded = String::with_capacity(namespace.len());
    for byte in namespace.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }
    encoded
}

#[async_trait::async_trait]
impl CheckpointSink for FileCheckpointSink {
    fn name(&self) -> &str {
        "local"
    }

    async fn write(&self, checkpoint: &Checkpoint) -> Result<(), SinkError> {
        let target = self.path_for(&checkpoint.namespace);
        let temp = self.dir.join(format!(
            ".{}.{}.tmp",
            encode_namespace(&checkpoint.namespace),
            uuid::Uuid::new_v4().simple()
        ));

        let json = serde_json::to_vec_pretty(checkpoint)?;
        if let Err(e) = tokio::fs::write(&temp, &json).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&temp, &target).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn read(&self, namespace: &str) -> Result<Option<Checkpoint>, SinkError> {
        Self::read_path(&self.path_for(namespace)).await
    }

    async fn list(&self) -> Result<Vec<CheckpointSummary>, SinkError> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut summaries = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_snapshot = path.extension().is_some_and(|ext| ext == EXTENSION)
                && !entry.file_name().to_string_lossy().starts_with('.');
            if !is_snapshot {
                continue;
            }

            match Self::read_path(&path).await {
                Ok(Some(checkpoint)) => {
                    summaries.push(CheckpointSummary::from_checkpoint(&checkpoint, self.name()))
                }
                Ok(None) => {}
                Err(e) => warn!("Skipping unreadable checkpoint {}: {}", path.display(), e),
            }
        }

        Ok(summaries)
    }
}
