use crate::error::DbError;
use crate::models::ExecutionRow;
use chrono::{DateTime, Utc};
use serplens_core::{ExecutionStatus, PipelineExecution};
use sqlx::SqlitePool;
use uuid::Uuid;

#[derive(Clone)]
pub struct ExecutionRepository {
    pool: SqlitePool,
}

impl ExecutionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert the execution if its id is unused. Returns true when a row was
    /// written, false when one already existed (idempotent re-entry).
    pub async fn create(&self, execution: &PipelineExecution) -> Result<bool, DbError> {
        let row = ExecutionRow::from(execution);

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO pipeline_executions
                (id, enabled_phases, config, status, started_at, completed_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.id)
        .bind(&row.enabled_phases)
        .bind(&row.config)
        .bind(&row.status)
        .bind(row.started_at)
        .bind(row.completed_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<PipelineExecution>, DbError> {
        let row: Option<ExecutionRow> = sqlx::query_as(
            r#"
            SELECT id, enabled_phases, config, status, started_at, completed_at
            FROM pipeline_executions
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into_domain()))
    }

    pub async fn get(&self, id: Uuid) -> Result<PipelineExecution, DbError> {
        self.find_by_id(id)
            .await?
            .ok_or(DbError::ExecutionNotFound(id))
    }

    /// Persist the terminal status once a run quiesces. Guarded so two
    /// racing runners cannot overwrite each other's terminal write.
    pub async fn finish(
        &self,
        id: Uuid,
        status: ExecutionStatus,
        completed_at: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let result = sqlx::query(
            r#"
            UPDATE pipeline_executions
            SET status = ?, completed_at = ?
            WHERE id = ? AND status = 'running'
            "#,
        )
        .bind(status.as_str())
        .bind(completed_at.timestamp())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Put a failed execution back to running after a phase retry.
    pub async fn reopen(&self, id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query(
            r#"
            UPDATE pipeline_executions
            SET status = 'running', completed_at = NULL
            WHERE id = ? AND status = 'failed'
            "#,
        )
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn find_all(&self) -> Result<Vec<PipelineExecution>, DbError> {
        let rows: Vec<ExecutionRow> = sqlx::query_as(
            r#"
            SELECT id, enabled_phases, config, status, started_at, completed_at
            FROM pipeline_executions
            ORDER BY started_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into_domain()).collect())
    }

    pub async fn find_by_status(
        &self,
        status: ExecutionStatus,
    ) -> Result<Vec<PipelineExecution>, DbError> {
        let rows: Vec<ExecutionRow> = sqlx::query_as(
            r#"
            SELECT id, enabled_phases, config, status, started_at, completed_at
            FROM pipeline_executions
            WHERE status = ?
            ORDER BY started_at DESC
            "#,
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into_domain()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};
    use serde_json::json;

    async fn setup_test_db() -> SqlitePool {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        pool
    }

    fn sample_execution() -> PipelineExecution {
        PipelineExecution::new(
            Uuid::new_v4(),
            vec!["keyword_metrics".to_string(), "serp_collection".to_string()],
            json!({"market": "us"}),
        )
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let repo = ExecutionRepository::new(setup_test_db().await);
        let execution = sample_execution();

        assert!(repo.create(&execution).await.unwrap());

        let found = repo.get(execution.id).await.unwrap();
        assert_eq!(found.enabled_phases, execution.enabled_phases);
        assert_eq!(found.config, json!({"market": "us"}));
        assert_eq!(found.status, ExecutionStatus::Running);
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let repo = ExecutionRepository::new(setup_test_db().await);
        let execution = sample_execution();

        assert!(repo.create(&execution).await.unwrap());
        assert!(!repo.create(&execution).await.unwrap());
    }

    #[tokio::test]
    async fn test_get_missing_execution() {
        let repo = ExecutionRepository::new(setup_test_db().await);
        let id = Uuid::new_v4();

        let err = repo.get(id).await.unwrap_err();
        assert!(matches!(err, DbError::ExecutionNotFound(missing) if missing == id));
    }

    #[tokio::test]
    async fn test_finish_is_guarded() {
        let repo = ExecutionRepository::new(setup_test_db().await);
        let execution = sample_execution();
        repo.create(&execution).await.unwrap();

        assert!(repo
            .finish(execution.id, ExecutionStatus::Failed, Utc::now())
            .await
            .unwrap());

        // Already terminal: the second write must not land.
        assert!(!repo
            .finish(execution.id, ExecutionStatus::Completed, Utc::now())
            .await
            .unwrap());

        let found = repo.get(execution.id).await.unwrap();
        assert_eq!(found.status, ExecutionStatus::Failed);
        assert!(found.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_reopen_failed_execution() {
        let repo = ExecutionRepository::new(setup_test_db().await);
        let execution = sample_execution();
        repo.create(&execution).await.unwrap();
        repo.finish(execution.id, ExecutionStatus::Failed, Utc::now())
            .await
            .unwrap();

        assert!(repo.reopen(execution.id).await.unwrap());

        let found = repo.get(execution.id).await.unwrap();
        assert_eq!(found.status, ExecutionStatus::Running);
        assert!(found.completed_at.is_none());

        // Reopening a running execution is a no-op.
        assert!(!repo.reopen(execution.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_find_by_status() {
        let repo = ExecutionRepository::new(setup_test_db().await);
        let first = sample_execution();
        let second = sample_execution();
        repo.create(&first).await.unwrap();
        repo.create(&second).await.unwrap();
        repo.finish(first.id, ExecutionStatus::Completed, Utc::now())
            .await
            .unwrap();

        let running = repo.find_by_status(ExecutionStatus::Running).await.unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, second.id);

        let all = repo.find_all().await.unwrap();
        assert_eq!(all.len(), 2);
    }
}
