use serplens_core::PhaseStatus;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Execution not found: {0}")]
    ExecutionNotFound(Uuid),

    #[error("Phase {phase} not found for execution {execution_id}")]
    PhaseNotFound { execution_id: Uuid, phase: String },

    /// The compare-and-set guard missed: either the caller raced another
    /// writer (`from` is the status actually found) or it asked for an edge
    /// outside the legal transition table.
    #[error("Invalid transition for phase {phase}: {from} -> {to}")]
    InvalidTransition {
        execution_id: Uuid,
        phase: String,
        from: PhaseStatus,
        to: PhaseStatus,
    },
}
