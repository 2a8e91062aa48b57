//! Training log: every pipeline run is persisted as a labeled example for
//! later fine-tuning. Persistence is strictly best-effort; a broken or
//! absent store must never fail a request.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{sqlite::SqlitePoolOptions, Pool, Row, Sqlite};
use std::path::Path;
use tracing::warn;

use sqlpilot_core::types::TokenUsage;

/// One pipeline run, successful or not.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingLogEntry {
    pub prompt: String,
    pub model_output: Option<Value>,
    pub sql: Option<String>,
    pub execution_result: Option<Value>,
    pub has_error: bool,
    pub error_message: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub strategy: Option<String>,
    pub tool_call: Option<Value>,
    pub planner: Option<Value>,
    pub schema_source: Option<String>,
    pub duration_ms: Option<i64>,
    pub usage: Option<TokenUsage>,
    pub metadata: Option<Value>,
}

/// Sink for training examples. `record` must swallow its own failures.
#[async_trait]
pub trait TrainingLogSink: Send + Sync {
    async fn record(&self, entry: TrainingLogEntry);
}

/// Sink used when no log store is configured.
pub struct NullTrainingLog;

#[async_trait]
impl TrainingLogSink for NullTrainingLog {
    async fn record(&self, _entry: TrainingLogEntry) {}
}

#[derive(Clone)]
pub struct SqliteTrainingLog {
    pool: Pool<Sqlite>,
}

impl SqliteTrainingLog {
    pub async fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_url = format!("sqlite://{}?mode=rwc", db_path.as_ref().display());
        let pool = SqlitePoolOptions::new()
            .connect(&db_url)
            .await
            .context("Failed to connect to training log database")?;
        let log = Self { pool };
        log.migrate().await?;
        Ok(log)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS training_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                prompt TEXT NOT NULL,
                model_output TEXT,
                sql_text TEXT,
                execution_result TEXT,
                has_error INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                provider TEXT,
                model TEXT,
                strategy TEXT,
                tool_call TEXT,
                planner TEXT,
                schema_source TEXT,
                duration_ms INTEGER,
                usage TEXT,
                metadata TEXT,
                created_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create training_logs table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_training_logs_created_at ON training_logs(created_at)",
        )
        .execute(&self.pool)
        .await
        .context("Failed to create training log index")?;

        Ok(())
    }

    async fn insert(&self, entry: &TrainingLogEntry) -> Result<()> {
        let usage = entry
            .usage
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        sqlx::query(
            r#"
            INSERT INTO training_logs (
                prompt, model_output, sql_text, execution_result, has_error,
                error_message, provider, model, strategy, tool_call, planner,
                schema_source, duration_ms, usage, metadata, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.prompt)
        .bind(entry.model_output.as_ref().map(Value::to_string))
        .bind(&entry.sql)
        .bind(entry.execution_result.as_ref().map(Value::to_string))
        .bind(entry.has_error as i64)
        .bind(&entry.error_message)
        .bind(&entry.provider)
        .bind(&entry.model)
        .bind(&entry.strategy)
        .bind(entry.tool_call.as_ref().map(Value::to_string))
        .bind(entry.planner.as_ref().map(Value::to_string))
        .bind(&entry.schema_source)
        .bind(entry.duration_ms)
        .bind(usage)
        .bind(entry.metadata.as_ref().map(Value::to_string))
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .context("Failed to insert training log row")?;
        Ok(())
    }

    pub async fn count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM training_logs")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n"))
    }
}

#[async_trait]
impl TrainingLogSink for SqliteTrainingLog {
    async fn record(&self, entry: TrainingLogEntry) {
        if let Err(err) = self.insert(&entry).await {
            warn!(error = %err, "Failed to persist training log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn sample_entry() -> TrainingLogEntry {
        TrainingLogEntry {
            prompt: "list devices".to_string(),
            model_output: Some(json!("SELECT * FROM devices;")),
            sql: Some("SELECT * FROM devices;".to_string()),
            execution_result: Some(json!({ "rows": [] })),
            provider: Some("deepseek".to_string()),
            strategy: Some("sql".to_string()),
            schema_source: Some("fetched".to_string()),
            duration_ms: Some(420),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_records_are_persisted() {
        let dir = tempdir().unwrap();
        let log = SqliteTrainingLog::new(dir.path().join("training.db"))
            .await
            .unwrap();
        log.record(sample_entry()).await;
        log.record(TrainingLogEntry {
            has_error: true,
            error_message: Some("Deepseek API error 500: boom".to_string()),
            sql: None,
            ..sample_entry()
        })
        .await;
        assert_eq!(log.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_reopening_keeps_existing_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("training.db");
        {
            let log = SqliteTrainingLog::new(&path).await.unwrap();
            log.record(sample_entry()).await;
        }
        let log = SqliteTrainingLog::new(&path).await.unwrap();
        assert_eq!(log.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_null_sink_is_silent() {
        NullTrainingLog.record(sample_entry()).await;
    }

    #[test]
    fn test_entry_serializes_camel_case() {
        let value = serde_json::to_value(sample_entry()).unwrap();
        assert!(value.get("schemaSource").is_some());
        assert!(value.get("durationMs").is_some());
        assert!(value.get("hasError").is_some());
    }
}
