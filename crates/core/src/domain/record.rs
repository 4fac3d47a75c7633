use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::status::PhaseStatus;

/// Durable status record for one phase of one pipeline execution.
///
/// Exactly one record exists per (execution, enabled phase). The state store
/// is the only writer; everything else holds read-through copies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub execution_id: Uuid,
    pub phase_name: String,
    pub status: PhaseStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Opaque payload stored when the handler succeeds.
    pub result_data: Option<serde_json::Value>,
    pub error_message: Option<String>,
    /// Name of the failed ancestor that blocked this record, if any.
    pub blocked_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PhaseRecord {
    pub fn new(execution_id: Uuid, phase_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            execution_id,
            phase_name: phase_name.into(),
            status: PhaseStatus::default(),
            started_at: None,
            completed_at: None,
            result_data: None,
            error_message: None,
            blocked_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Result contract between the orchestrator and phase handlers: a mandatory
/// success flag plus an arbitrary phase-specific payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseOutput {
    pub success: bool,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PhaseOutput {
    pub fn success(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: serde_json::Value::Null,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_record_is_pending() {
        let record = PhaseRecord::new(Uuid::new_v4(), "serp_collection");

        assert_eq!(record.status, PhaseStatus::Pending);
        assert!(record.started_at.is_none());
        assert!(record.completed_at.is_none());
        assert!(record.result_data.is_none());
        assert!(record.blocked_by.is_none());
        assert!(!record.is_terminal());
    }

    #[test]
    fn test_phase_output_success() {
        let output = PhaseOutput::success(json!({"keywords": 42}));

        assert!(output.success);
        assert_eq!(output.data["keywords"], 42);
        assert!(output.error.is_none());
    }

    #[test]
    fn test_phase_output_failure() {
        let output = PhaseOutput::failure("quota exceeded");

        assert!(!output.success);
        assert_eq!(output.error.as_deref(), Some("quota exceeded"));
    }

    #[test]
    fn test_phase_output_round_trips_through_json() {
        let output = PhaseOutput::success(json!({"rows": 10}));
        let value = serde_json::to_value(&output).unwrap();
        let parsed: PhaseOutput = serde_json::from_value(value).unwrap();

        assert!(parsed.success);
        assert_eq!(parsed.data["rows"], 10);
    }
}
