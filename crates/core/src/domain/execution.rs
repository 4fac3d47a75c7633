use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::record::PhaseRecord;
use super::status::{ExecutionStatus, PhaseStatus};

/// One run of a chosen subset of pipeline phases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineExecution {
    pub id: Uuid,
    /// Subset of registered phase names selected for this run.
    pub enabled_phases: Vec<String>,
    /// Execution-level configuration merged into every handler context.
    pub config: serde_json::Value,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PipelineExecution {
    pub fn new(id: Uuid, enabled_phases: Vec<String>, config: serde_json::Value) -> Self {
        Self {
            id,
            enabled_phases,
            config,
            status: ExecutionStatus::default(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_enabled(&self, phase_name: &str) -> bool {
        self.enabled_phases.iter().any(|p| p == phase_name)
    }
}

impl ExecutionStatus {
    /// Derive the execution status from the aggregate of its phase records:
    /// running while any record is pending or running, otherwise failed if
    /// any record failed or was blocked, otherwise completed.
    pub fn from_records(records: &[PhaseRecord]) -> Self {
        let active = records
            .iter()
            .any(|r| matches!(r.status, PhaseStatus::Pending | PhaseStatus::Running));
        if active {
            return Self::Running;
        }

        let failed = records
            .iter()
            .any(|r| matches!(r.status, PhaseStatus::Failed | PhaseStatus::Blocked));
        if failed {
            Self::Failed
        } else {
            Self::Completed
        }
    }
}

/// Aggregate outcome of a `run` call, derived entirely from phase records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub execution_id: Uuid,
    pub status: ExecutionStatus,
    pub completed: usize,
    pub failed: usize,
    pub blocked: usize,
    pub skipped: usize,
    pub phase_details: Vec<PhaseRecord>,
}

impl ExecutionSummary {
    pub fn from_records(execution_id: Uuid, records: Vec<PhaseRecord>) -> Self {
        let status = ExecutionStatus::from_records(&records);

        let mut completed = 0;
        let mut failed = 0;
        let mut blocked = 0;
        let mut skipped = 0;
        for record in &records {
            match record.status {
                PhaseStatus::Completed => completed += 1,
                PhaseStatus::Failed => failed += 1,
                PhaseStatus::Blocked => blocked += 1,
                PhaseStatus::Skipped => skipped += 1,
                PhaseStatus::Pending | PhaseStatus::Running => {}
            }
        }

        Self {
            execution_id,
            status,
            completed,
            failed,
            blocked,
            skipped,
            phase_details: records,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record_with_status(execution_id: Uuid, name: &str, status: PhaseStatus) -> PhaseRecord {
        let mut record = PhaseRecord::new(execution_id, name);
        record.status = status;
        record
    }

    #[test]
    fn test_execution_creation() {
        let id = Uuid::new_v4();
        let execution = PipelineExecution::new(
            id,
            vec!["keyword_metrics".to_string()],
            json!({"region": "us"}),
        );

        assert_eq!(execution.id, id);
        assert_eq!(execution.status, ExecutionStatus::Running);
        assert!(execution.is_enabled("keyword_metrics"));
        assert!(!execution.is_enabled("serp_collection"));
        assert!(execution.completed_at.is_none());
    }

    #[test]
    fn test_status_derivation_running() {
        let id = Uuid::new_v4();
        let records = vec![
            record_with_status(id, "a", PhaseStatus::Completed),
            record_with_status(id, "b", PhaseStatus::Pending),
        ];

        assert_eq!(ExecutionStatus::from_records(&records), ExecutionStatus::Running);
    }

    #[test]
    fn test_status_derivation_failed() {
        let id = Uuid::new_v4();
        let records = vec![
            record_with_status(id, "a", PhaseStatus::Failed),
            record_with_status(id, "b", PhaseStatus::Blocked),
        ];

        assert_eq!(ExecutionStatus::from_records(&records), ExecutionStatus::Failed);
    }

    #[test]
    fn test_status_derivation_completed_with_skips() {
        let id = Uuid::new_v4();
        let records = vec![
            record_with_status(id, "a", PhaseStatus::Completed),
            record_with_status(id, "b", PhaseStatus::Skipped),
        ];

        assert_eq!(
            ExecutionStatus::from_records(&records),
            ExecutionStatus::Completed
        );
    }

    #[test]
    fn test_summary_counts() {
        let id = Uuid::new_v4();
        let records = vec![
            record_with_status(id, "a", PhaseStatus::Completed),
            record_with_status(id, "b", PhaseStatus::Failed),
            record_with_status(id, "c", PhaseStatus::Blocked),
            record_with_status(id, "d", PhaseStatus::Blocked),
            record_with_status(id, "e", PhaseStatus::Skipped),
        ];

        let summary = ExecutionSummary::from_records(id, records);

        assert_eq!(summary.status, ExecutionStatus::Failed);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.blocked, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.phase_details.len(), 5);
    }
}
