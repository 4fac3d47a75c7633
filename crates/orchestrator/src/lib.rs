pub mod context;
pub mod error;
pub mod handler;
pub mod runner;
mod scheduler;

pub use context::PhaseContext;
pub use error::{OrchestratorError, Result};
pub use handler::{HandlerRegistry, PhaseHandler};
pub use runner::PipelineRunner;
