//! Pipeline lifecycle event types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope wrapping every event with delivery metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique event ID
    pub id: Uuid,
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
    /// The actual event
    pub event: Event,
}

impl EventEnvelope {
    pub fn new(event: Event) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event,
        }
    }
}

/// Everything the orchestrator announces while driving a pipeline.
///
/// Consumers (the progress UI, log sinks) subscribe through the
/// [`EventBus`](crate::EventBus); publishing never blocks the runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Phase records were created for a new execution.
    #[serde(rename = "execution.initialized")]
    ExecutionInitialized {
        execution_id: Uuid,
        enabled_phases: Vec<String>,
    },

    /// A run loop finished and the terminal status was persisted.
    #[serde(rename = "execution.finished")]
    ExecutionFinished { execution_id: Uuid, status: String },

    /// Cancellation skipped the remaining pending phases.
    #[serde(rename = "execution.cancelled")]
    ExecutionCancelled { execution_id: Uuid, skipped: usize },

    /// A phase was claimed and its handler invoked.
    #[serde(rename = "phase.started")]
    PhaseStarted { execution_id: Uuid, phase: String },

    /// A handler returned success and its payload was stored.
    #[serde(rename = "phase.completed")]
    PhaseCompleted { execution_id: Uuid, phase: String },

    /// A handler reported failure or returned an error.
    #[serde(rename = "phase.failed")]
    PhaseFailed {
        execution_id: Uuid,
        phase: String,
        error: String,
    },

    /// A pending phase was blocked by a failed ancestor.
    #[serde(rename = "phase.blocked")]
    PhaseBlocked {
        execution_id: Uuid,
        phase: String,
        blocked_by: String,
    },

    /// A pending phase was skipped by cancellation.
    #[serde(rename = "phase.skipped")]
    PhaseSkipped { execution_id: Uuid, phase: String },

    /// A failed or blocked phase was reset to pending.
    #[serde(rename = "phase.retried")]
    PhaseRetried { execution_id: Uuid, phase: String },
}

impl Event {
    /// The execution this event belongs to, for per-run filtering.
    pub fn execution_id(&self) -> Uuid {
        match self {
            Self::ExecutionInitialized { execution_id, .. }
            | Self::ExecutionFinished { execution_id, .. }
            | Self::ExecutionCancelled { execution_id, .. }
            | Self::PhaseStarted { execution_id, .. }
            | Self::PhaseCompleted { execution_id, .. }
            | Self::PhaseFailed { execution_id, .. }
            | Self::PhaseBlocked { execution_id, .. }
            | Self::PhaseSkipped { execution_id, .. }
            | Self::PhaseRetried { execution_id, .. } => *execution_id,
        }
    }
}
