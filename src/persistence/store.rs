//! SQLite-based checkpoint sink

use crate::persistence::{Checkpoint, CheckpointSink, CheckpointSummary, SinkError};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;

const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS checkpoints (
    namespace TEXT PRIMARY KEY,
    stage_index INTEGER NOT NULL,
    stage_name TEXT NOT NULL,
    data TEXT NOT NULL,
    checkpointed_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_checkpointed_at ON checkpoints(checkpointed_at);
"#;

/// SQLite checkpoint sink. Read before the local sink on restore.
pub struct SqliteCheckpointSink {
    pool: SqlitePool,
}

impl SqliteCheckpointSink {
    /// Connect to a database URL such as `sqlite:/var/lib/stagehand/runs.db`,
    /// creating the file if needed
    pub async fn connect(url: &str) -> Result<Self, SinkError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        Self::with_options(options).await
    }

    /// Open (or create) a database file
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        Self::with_options(options).await
    }

    async fn with_options(options: SqliteConnectOptions) -> Result<Self, SinkError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let sink = Self { pool };
        sink.init().await?;
        Ok(sink)
    }

    /// Initialize database schema
    async fn init(&self) -> Result<(), SinkError> {
        sqlx::raw_sql(CREATE_TABLES).execute(&self.pool).await?;
        Ok(())
    }

    fn parse_timestamp(namespace: &str, raw: &str) -> Result<DateTime<Utc>, SinkError> {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| SinkError::Corrupt {
                namespace: namespace.to_string(),
                reason: format!("bad timestamp '{}': {}", raw, e),
            })
    }

    fn stage_index(namespace: &str, row: &SqliteRow) -> Result<usize, SinkError> {
        let raw: i64 = row.try_get("stage_index")?;
        usize::try_from(raw).map_err(|_| SinkError::Corrupt {
            namespace: namespace.to_string(),
            reason: format!("negative stage index {}", raw),
        })
    }
}

#[async_trait::async_trait]
impl CheckpointSink for SqliteCheckpointSink {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn priority(&self) -> i32 {
        10
    }

    async fn write(&self, checkpoint: &Checkpoint) -> Result<(), SinkError> {
        let data = serde_json::to_string(&checkpoint.data)?;

        sqlx::query(
            r#"
            INSERT INTO checkpoints (namespace, stage_index, stage_name, data, checkpointed_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(namespace) DO UPDATE SET
                stage_index = excluded.stage_index,
                stage_name = excluded.stage_name,
                data = excluded.data,
                checkpointed_at = excluded.checkpointed_at
            "#,
        )
        .bind(&checkpoint.namespace)
        .bind(checkpoint.stage_index as i64)
        .bind(&checkpoint.stage_name)
        .bind(data)
        .bind(checkpoint.checkpointed_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn read(&self, namespace: &str) -> Result<Option<Checkpoint>, SinkError> {
        let row = sqlx::query(
            r#"
            SELECT namespace, stage_index, stage_name, data, checkpointed_at
            FROM checkpoints
            WHERE namespace = ?1
            "#,
        )
        .bind(namespace)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let data: String = row.try_get("data")?;
        let checkpointed_at: String = row.try_get("checkpointed_at")?;

        Ok(Some(Checkpoint {
            namespace: row.try_get("namespace")?,
            stage_index: Self::stage_index(namespace, &row)?,
            stage_name: row.try_get("stage_name")?,
            data: serde_json::from_str(&data)?,
            checkpointed_at: Self::parse_timestamp(namespace, &checkpointed_at)?,
        }))
    }

    async fn list(&self) -> Result<Vec<CheckpointSummary>, SinkError> {
        let rows = sqlx::query(
            r#"
            SELECT namespace, stage_index, stage_name, checkpointed_at
            FROM checkpoints
            ORDER BY checkpointed_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<CheckpointSummary, SinkError> {
                let namespace: String = row.try_get("namespace")?;
                let checkpointed_at: String = row.try_get("checkpointed_at")?;
                Ok(CheckpointSummary {
                    stage_index: Self::stage_index(&namespace, row)?,
                    stage_name: row.try_get("stage_name")?,
                    checkpointed_at: Self::parse_timestamp(&namespace, &checkpointed_at)?,
                    sink: self.name().to_string(),
                    namespace,
                })
            })
            .collect()
    }
}
