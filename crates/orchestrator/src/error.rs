use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Database error: {0}")]
    Database(#[from] db::DbError),

    #[error("Registry error: {0}")]
    Registry(#[from] serplens_core::CoreError),

    #[error("No handler registered for phase: {0}")]
    MissingHandler(String),

    #[error("Execution {execution_id} already exists with a different phase set")]
    DuplicateExecution { execution_id: Uuid },

    #[error("Cannot retry phase {phase}: {reason}")]
    InvalidRetry { phase: String, reason: String },

    #[error("Phase {phase} depends on {dependency}, which is not enabled")]
    DependencyNotEnabled { phase: String, dependency: String },

    #[error("Phase {phase} appears more than once in the enabled set")]
    DuplicateEnabledPhase { phase: String },
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
