use crate::error::DbError;
use crate::models::PhaseRecordRow;
use chrono::Utc;
use serplens_core::{PhaseRecord, PhaseStatus};
use sqlx::SqlitePool;
use uuid::Uuid;

/// A status change request: the target status plus exactly the columns that
/// transition writes. Every mutation of a phase record goes through
/// [`PhaseRecordRepository::transition`] with one of these.
#[derive(Debug, Clone)]
pub enum PhaseTransition {
    /// `-> running`, stamps `started_at`.
    Started,
    /// `-> completed`, stores the handler payload.
    Completed { result_data: serde_json::Value },
    /// `-> failed`, stores the error message.
    Failed { error_message: String },
    /// `-> blocked`, names the failed ancestor.
    Blocked { blocked_by: String },
    /// `-> skipped` (cancellation).
    Skipped,
    /// `-> pending`, clearing all outcome columns (retry).
    Reset,
}

impl PhaseTransition {
    pub fn target_status(&self) -> PhaseStatus {
        match self {
            Self::Started => PhaseStatus::Running,
            Self::Completed { .. } => PhaseStatus::Completed,
            Self::Failed { .. } => PhaseStatus::Failed,
            Self::Blocked { .. } => PhaseStatus::Blocked,
            Self::Skipped => PhaseStatus::Skipped,
            Self::Reset => PhaseStatus::Pending,
        }
    }
}

#[derive(Clone)]
pub struct PhaseRecordRepository {
    pool: SqlitePool,
}

impl PhaseRecordRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create one `pending` record per enabled phase.
    ///
    /// `INSERT OR IGNORE` keeps re-entry idempotent: records that already
    /// exist are never touched, so a crash between execution and record
    /// creation heals on the next initialize. Returns the number of rows
    /// actually inserted.
    pub async fn initialize(
        &self,
        execution_id: Uuid,
        enabled_phases: &[String],
    ) -> Result<usize, DbError> {
        let now = Utc::now().timestamp();
        let execution_key = execution_id.to_string();

        let mut created = 0;
        for phase in enabled_phases {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO phase_records
                    (pipeline_execution_id, phase_name, status, created_at, updated_at)
                VALUES (?, ?, 'pending', ?, ?)
                "#,
            )
            .bind(&execution_key)
            .bind(phase)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await?;
            created += result.rows_affected() as usize;
        }

        Ok(created)
    }

    pub async fn find(
        &self,
        execution_id: Uuid,
        phase: &str,
    ) -> Result<Option<PhaseRecord>, DbError> {
        let row: Option<PhaseRecordRow> = sqlx::query_as(
            r#"
            SELECT pipeline_execution_id, phase_name, status, started_at, completed_at,
                   result_data, error_message, blocked_by, created_at, updated_at
            FROM phase_records
            WHERE pipeline_execution_id = ? AND phase_name = ?
            "#,
        )
        .bind(execution_id.to_string())
        .bind(phase)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into_domain()))
    }

    pub async fn get(&self, execution_id: Uuid, phase: &str) -> Result<PhaseRecord, DbError> {
        self.find(execution_id, phase)
            .await?
            .ok_or_else(|| DbError::PhaseNotFound {
                execution_id,
                phase: phase.to_string(),
            })
    }

    pub async fn list(&self, execution_id: Uuid) -> Result<Vec<PhaseRecord>, DbError> {
        let rows: Vec<PhaseRecordRow> = sqlx::query_as(
            r#"
            SELECT pipeline_execution_id, phase_name, status, started_at, completed_at,
                   result_data, error_message, blocked_by, created_at, updated_at
            FROM phase_records
            WHERE pipeline_execution_id = ?
            ORDER BY phase_name ASC
            "#,
        )
        .bind(execution_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into_domain()).collect())
    }

    pub async fn find_by_status(
        &self,
        execution_id: Uuid,
        status: PhaseStatus,
    ) -> Result<Vec<PhaseRecord>, DbError> {
        let rows: Vec<PhaseRecordRow> = sqlx::query_as(
            r#"
            SELECT pipeline_execution_id, phase_name, status, started_at, completed_at,
                   result_data, error_message, blocked_by, created_at, updated_at
            FROM phase_records
            WHERE pipeline_execution_id = ? AND status = ?
            ORDER BY phase_name ASC
            "#,
        )
        .bind(execution_id.to_string())
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into_domain()).collect())
    }

    /// Atomic compare-and-set: move the record to the transition's target
    /// status only if it currently holds `expected`.
    ///
    /// A miss means another writer got there first (or the record is gone);
    /// the caller receives [`DbError::InvalidTransition`] carrying the status
    /// actually found and is expected to re-evaluate eligibility rather than
    /// treat it as fatal.
    pub async fn transition(
        &self,
        execution_id: Uuid,
        phase: &str,
        expected: PhaseStatus,
        transition: PhaseTransition,
    ) -> Result<PhaseRecord, DbError> {
        let target = transition.target_status();
        if !expected.can_transition_to(target) {
            return Err(DbError::InvalidTransition {
                execution_id,
                phase: phase.to_string(),
                from: expected,
                to: target,
            });
        }

        let now = Utc::now().timestamp();
        let execution_key = execution_id.to_string();

        let result = match &transition {
            PhaseTransition::Started => {
                sqlx::query(
                    r#"
                    UPDATE phase_records
                    SET status = 'running', started_at = ?, updated_at = ?
                    WHERE pipeline_execution_id = ? AND phase_name = ? AND status = ?
                    "#,
                )
                .bind(now)
                .bind(now)
                .bind(&execution_key)
                .bind(phase)
                .bind(expected.as_str())
                .execute(&self.pool)
                .await?
            }
            PhaseTransition::Completed { result_data } => {
                sqlx::query(
                    r#"
                    UPDATE phase_records
                    SET status = 'completed', completed_at = ?, result_data = ?, updated_at = ?
                    WHERE pipeline_execution_id = ? AND phase_name = ? AND status = ?
                    "#,
                )
                .bind(now)
                .bind(result_data.to_string())
                .bind(now)
                .bind(&execution_key)
                .bind(phase)
                .bind(expected.as_str())
                .execute(&self.pool)
                .await?
            }
            PhaseTransition::Failed { error_message } => {
                sqlx::query(
                    r#"
                    UPDATE phase_records
                    SET status = 'failed', completed_at = ?, error_message = ?, updated_at = ?
                    WHERE pipeline_execution_id = ? AND phase_name = ? AND status = ?
                    "#,
                )
                .bind(now)
                .bind(error_message)
                .bind(now)
                .bind(&execution_key)
                .bind(phase)
                .bind(expected.as_str())
                .execute(&self.pool)
                .await?
            }
            PhaseTransition::Blocked { blocked_by } => {
                sqlx::query(
                    r#"
                    UPDATE phase_records
                    SET status = 'blocked', completed_at = ?, blocked_by = ?, updated_at = ?
                    WHERE pipeline_execution_id = ? AND phase_name = ? AND status = ?
                    "#,
                )
                .bind(now)
                .bind(blocked_by)
                .bind(now)
                .bind(&execution_key)
                .bind(phase)
                .bind(expected.as_str())
                .execute(&self.pool)
                .await?
            }
            PhaseTransition::Skipped => {
                sqlx::query(
                    r#"
                    UPDATE phase_records
                    SET status = 'skipped', completed_at = ?, updated_at = ?
                    WHERE pipeline_execution_id = ? AND phase_name = ? AND status = ?
                    "#,
                )
                .bind(now)
                .bind(now)
                .bind(&execution_key)
                .bind(phase)
                .bind(expected.as_str())
                .execute(&self.pool)
                .await?
            }
            PhaseTransition::Reset => {
                sqlx::query(
                    r#"
                    UPDATE phase_records
                    SET status = 'pending', started_at = NULL, completed_at = NULL,
                        result_data = NULL, error_message = NULL, blocked_by = NULL,
                        updated_at = ?
                    WHERE pipeline_execution_id = ? AND phase_name = ? AND status = ?
                    "#,
                )
                .bind(now)
                .bind(&execution_key)
                .bind(phase)
                .bind(expected.as_str())
                .execute(&self.pool)
                .await?
            }
        };

        if result.rows_affected() == 0 {
            return match self.find(execution_id, phase).await? {
                Some(record) => Err(DbError::InvalidTransition {
                    execution_id,
                    phase: phase.to_string(),
                    from: record.status,
                    to: target,
                }),
                None => Err(DbError::PhaseNotFound {
                    execution_id,
                    phase: phase.to_string(),
                }),
            };
        }

        self.get(execution_id, phase).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::ExecutionRepository;
    use crate::{create_pool, run_migrations};
    use serde_json::json;
    use serplens_core::PipelineExecution;

    async fn setup_test_db() -> SqlitePool {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        pool
    }

    async fn seed_execution(pool: &SqlitePool, phases: &[&str]) -> Uuid {
        let enabled: Vec<String> = phases.iter().map(|p| p.to_string()).collect();
        let execution = PipelineExecution::new(Uuid::new_v4(), enabled.clone(), json!({}));
        ExecutionRepository::new(pool.clone())
            .create(&execution)
            .await
            .unwrap();
        PhaseRecordRepository::new(pool.clone())
            .initialize(execution.id, &enabled)
            .await
            .unwrap();
        execution.id
    }

    #[tokio::test]
    async fn test_initialize_creates_pending_records() {
        let pool = setup_test_db().await;
        let execution_id = seed_execution(&pool, &["a", "b"]).await;
        let repo = PhaseRecordRepository::new(pool);

        let records = repo.list(execution_id).await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.status == PhaseStatus::Pending));
        assert!(records.iter().all(|r| r.started_at.is_none()));
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let pool = setup_test_db().await;
        let execution_id = seed_execution(&pool, &["a", "b"]).await;
        let repo = PhaseRecordRepository::new(pool);

        // Claim one record, then re-initialize: nothing may be recreated.
        repo.transition(execution_id, "a", PhaseStatus::Pending, PhaseTransition::Started)
            .await
            .unwrap();
        let created = repo
            .initialize(execution_id, &["a".to_string(), "b".to_string()])
            .await
            .unwrap();

        assert_eq!(created, 0);
        let record = repo.get(execution_id, "a").await.unwrap();
        assert_eq!(record.status, PhaseStatus::Running);
    }

    #[tokio::test]
    async fn test_get_missing_phase() {
        let pool = setup_test_db().await;
        let execution_id = seed_execution(&pool, &["a"]).await;
        let repo = PhaseRecordRepository::new(pool);

        let err = repo.get(execution_id, "z").await.unwrap_err();
        assert!(matches!(err, DbError::PhaseNotFound { phase, .. } if phase == "z"));
    }

    #[tokio::test]
    async fn test_claim_then_complete() {
        let pool = setup_test_db().await;
        let execution_id = seed_execution(&pool, &["a"]).await;
        let repo = PhaseRecordRepository::new(pool);

        let claimed = repo
            .transition(execution_id, "a", PhaseStatus::Pending, PhaseTransition::Started)
            .await
            .unwrap();
        assert_eq!(claimed.status, PhaseStatus::Running);
        assert!(claimed.started_at.is_some());

        let completed = repo
            .transition(
                execution_id,
                "a",
                PhaseStatus::Running,
                PhaseTransition::Completed {
                    result_data: json!({"rows": 5}),
                },
            )
            .await
            .unwrap();
        assert_eq!(completed.status, PhaseStatus::Completed);
        assert_eq!(completed.result_data, Some(json!({"rows": 5})));
        assert!(completed.completed_at.is_some());
        assert!(completed.started_at.is_some());
    }

    #[tokio::test]
    async fn test_stale_claim_reports_actual_status() {
        let pool = setup_test_db().await;
        let execution_id = seed_execution(&pool, &["a"]).await;
        let repo = PhaseRecordRepository::new(pool);

        repo.transition(execution_id, "a", PhaseStatus::Pending, PhaseTransition::Started)
            .await
            .unwrap();

        // Second claim with a stale expectation loses the race.
        let err = repo
            .transition(execution_id, "a", PhaseStatus::Pending, PhaseTransition::Started)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::InvalidTransition {
                from: PhaseStatus::Running,
                to: PhaseStatus::Running,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_illegal_edge_rejected_without_touching_row() {
        let pool = setup_test_db().await;
        let execution_id = seed_execution(&pool, &["a"]).await;
        let repo = PhaseRecordRepository::new(pool);

        let err = repo
            .transition(
                execution_id,
                "a",
                PhaseStatus::Pending,
                PhaseTransition::Completed {
                    result_data: json!({}),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::InvalidTransition {
                from: PhaseStatus::Pending,
                to: PhaseStatus::Completed,
                ..
            }
        ));

        let record = repo.get(execution_id, "a").await.unwrap();
        assert_eq!(record.status, PhaseStatus::Pending);
    }

    #[tokio::test]
    async fn test_reset_clears_outcome_columns() {
        let pool = setup_test_db().await;
        let execution_id = seed_execution(&pool, &["a"]).await;
        let repo = PhaseRecordRepository::new(pool);

        repo.transition(execution_id, "a", PhaseStatus::Pending, PhaseTransition::Started)
            .await
            .unwrap();
        repo.transition(
            execution_id,
            "a",
            PhaseStatus::Running,
            PhaseTransition::Failed {
                error_message: "serp provider 500".to_string(),
            },
        )
        .await
        .unwrap();

        let reset = repo
            .transition(execution_id, "a", PhaseStatus::Failed, PhaseTransition::Reset)
            .await
            .unwrap();

        assert_eq!(reset.status, PhaseStatus::Pending);
        assert!(reset.started_at.is_none());
        assert!(reset.completed_at.is_none());
        assert!(reset.error_message.is_none());
        assert!(reset.blocked_by.is_none());
    }

    #[tokio::test]
    async fn test_blocked_records_keep_cause() {
        let pool = setup_test_db().await;
        let execution_id = seed_execution(&pool, &["a", "b"]).await;
        let repo = PhaseRecordRepository::new(pool);

        let blocked = repo
            .transition(
                execution_id,
                "b",
                PhaseStatus::Pending,
                PhaseTransition::Blocked {
                    blocked_by: "a".to_string(),
                },
            )
            .await
            .unwrap();

        assert_eq!(blocked.status, PhaseStatus::Blocked);
        assert_eq!(blocked.blocked_by.as_deref(), Some("a"));
        assert!(blocked.started_at.is_none());

        let blocked_records = repo
            .find_by_status(execution_id, PhaseStatus::Blocked)
            .await
            .unwrap();
        assert_eq!(blocked_records.len(), 1);
        assert_eq!(blocked_records[0].phase_name, "b");
    }
}
