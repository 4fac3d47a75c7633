use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Phase already registered: {0}")]
    DuplicatePhase(String),

    #[error("Unknown phase: {0}")]
    UnknownPhase(String),

    #[error("Phase {phase} depends on unregistered phase {dependency}")]
    UnknownDependency { phase: String, dependency: String },

    #[error("Dependency cycle among phases: {}", .0.join(", "))]
    DependencyCycle(Vec<String>),
}
