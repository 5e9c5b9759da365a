//! SQLite-based persistence store

use crate::core::RunStatus;
use crate::persistence::{ExecutionSummary, PersistenceBackend};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use uuid::Uuid;

const SELECT_COLUMNS: &str = "id, pipeline_name, event_kind, branch, status, started_at, completed_at, \
     steps_run, total_steps, failed_step, failure, exit_code, cache";

/// SQLite execution store
pub struct SqliteExecutionStore {
    pool: SqlitePool,
}

impl SqliteExecutionStore {
    /// Open (creating if needed) the database at `db_path`
    pub async fn new(db_path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path))
            .context("Invalid database path")?
            .create_if_missing(true);

        // a single connection keeps `:memory:` databases alive across queries
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Default database location under the platform data directory
    pub fn default_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("checkrun")
            .join("history.db")
    }

    /// Create store with default path
    pub async fn with_default_path() -> Result<Self> {
        Self::at_path(&Self::default_path()).await
    }

    pub async fn at_path(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        let path = path
            .to_str()
            .with_context(|| format!("Database path is not valid UTF-8: {}", path.display()))?;
        Self::new(path).await
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                pipeline_name TEXT NOT NULL,
                event_kind TEXT NOT NULL,
                branch TEXT,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                steps_run INTEGER NOT NULL DEFAULT 0,
                total_steps INTEGER NOT NULL DEFAULT 0,
                failed_step TEXT,
                failure TEXT,
                exit_code INTEGER NOT NULL DEFAULT 0,
                cache TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_runs_pipeline_name ON runs(pipeline_name);
            CREATE INDEX IF NOT EXISTS idx_runs_started_at ON runs(started_at);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Convert DateTime<Utc> to NaiveDateTime for SQLite
    fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
        dt.naive_utc()
    }

    /// Convert NaiveDateTime to DateTime<Utc>
    fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(dt, Utc)
    }

    fn from_row(row: &SqliteRow) -> Result<ExecutionSummary> {
        let status: String = row.get("status");
        Ok(ExecutionSummary {
            execution_id: Uuid::parse_str(&row.get::<String, _>("id"))?,
            pipeline_name: row.get("pipeline_name"),
            event_kind: row.get("event_kind"),
            branch: row.get("branch"),
            status: RunStatus::parse(&status)
                .with_context(|| format!("Unknown run status '{}'", status))?,
            started_at: Self::from_naive(row.get("started_at")),
            completed_at: row
                .get::<Option<NaiveDateTime>, _>("completed_at")
                .map(Self::from_naive),
            steps_run: row.get::<i64, _>("steps_run") as usize,
            total_steps: row.get::<i64, _>("total_steps") as usize,
            failed_step: row.get("failed_step"),
            failure: row.get("failure"),
            exit_code: row.get::<i64, _>("exit_code") as i32,
            cache: row.get("cache"),
        })
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for SqliteExecutionStore {
    async fn save_execution(&self, execution: &ExecutionSummary) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO runs
            (id, pipeline_name, event_kind, branch, status, started_at, completed_at,
             steps_run, total_steps, failed_step, failure, exit_code, cache)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
        )
        .bind(execution.execution_id.to_string())
        .bind(&execution.pipeline_name)
        .bind(&execution.event_kind)
        .bind(&execution.branch)
        .bind(format!("{:?}", execution.status))
        .bind(Self::to_naive(execution.started_at))
        .bind(execution.completed_at.map(Self::to_naive))
        .bind(execution.steps_run as i64)
        .bind(execution.total_steps as i64)
        .bind(&execution.failed_step)
        .bind(&execution.failure)
        .bind(execution.exit_code as i64)
        .bind(&execution.cache)
        .execute(&self.pool)
        .await
        .context("Failed to save execution")?;

        Ok(())
    }

    async fn load_execution(&self, execution_id: Uuid) -> Result<Option<ExecutionSummary>> {
        let row = sqlx::query(&format!("SELECT {} FROM runs WHERE id = ?1", SELECT_COLUMNS))
            .bind(execution_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load execution")?;

        row.as_ref().map(Self::from_row).transpose()
    }

    async fn list_executions(&self, pipeline_name: &str) -> Result<Vec<ExecutionSummary>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM runs WHERE pipeline_name = ?1 ORDER BY started_at DESC",
            SELECT_COLUMNS
        ))
        .bind(pipeline_name)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list executions")?;

        rows.iter().map(Self::from_row).collect()
    }

    async fn latest_execution(&self, pipeline_name: &str) -> Result<Option<ExecutionSummary>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM runs WHERE pipeline_name = ?1 ORDER BY started_at DESC LIMIT 1",
            SELECT_COLUMNS
        ))
        .bind(pipeline_name)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to get latest execution")?;

        row.as_ref().map(Self::from_row).transpose()
    }

    async fn list_pipelines(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT pipeline_name
            FROM runs
            ORDER BY pipeline_name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list pipelines")?;

        Ok(rows.iter().map(|row| row.get("pipeline_name")).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(pipeline: &str, status: RunStatus, failed_step: Option<&str>) -> ExecutionSummary {
        ExecutionSummary {
            execution_id: Uuid::new_v4(),
            pipeline_name: pipeline.to_string(),
            event_kind: "push".to_string(),
            branch: Some("main".to_string()),
            status,
            started_at: Utc::now(),
            completed_at: Some(Utc::now()),
            steps_run: if failed_step.is_some() { 2 } else { 6 },
            total_steps: 6,
            failed_step: failed_step.map(String::from),
            failure: failed_step.map(|_| "exited with code 1".to_string()),
            exit_code: if failed_step.is_some() { 1 } else { 0 },
            cache: "hit".to_string(),
        }
    }

    #[tokio::test]
    async fn test_sqlite_store() {
        let store = SqliteExecutionStore::new(":memory:").await.unwrap();

        let summary = summary("rust-ci", RunStatus::Failed, Some("fmt"));
        store.save_execution(&summary).await.unwrap();

        let loaded = store
            .load_execution(summary.execution_id)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(loaded.pipeline_name, summary.pipeline_name);
        assert_eq!(loaded.status, summary.status);
        assert_eq!(loaded.failed_step.as_deref(), Some("fmt"));
        assert_eq!(loaded.branch.as_deref(), Some("main"));
        assert_eq!(loaded.exit_code, 1);
    }

    #[tokio::test]
    async fn test_sqlite_listing() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteExecutionStore::at_path(&dir.path().join("nested/history.db"))
            .await
            .unwrap();

        store.save_execution(&summary("rust-ci", RunStatus::Succeeded, None)).await.unwrap();
        store.save_execution(&summary("rust-ci", RunStatus::Failed, Some("test"))).await.unwrap();
        store.save_execution(&summary("docs", RunStatus::Succeeded, None)).await.unwrap();

        assert_eq!(store.list_executions("rust-ci").await.unwrap().len(), 2);
        assert_eq!(
            store.list_pipelines().await.unwrap(),
            vec!["docs".to_string(), "rust-ci".to_string()]
        );
        assert!(store.latest_execution("docs").await.unwrap().is_some());
        assert!(store.latest_execution("missing").await.unwrap().is_none());
    }
}
