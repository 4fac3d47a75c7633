use chrono::{DateTime, TimeZone, Utc};
use serplens_core::{ExecutionStatus, PipelineExecution};
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ExecutionRow {
    pub id: String,
    pub enabled_phases: String,
    pub config: String,
    pub status: String,
    pub started_at: i64,
    pub completed_at: Option<i64>,
}

impl ExecutionRow {
    pub fn into_domain(self) -> PipelineExecution {
        PipelineExecution {
            id: Uuid::parse_str(&self.id).unwrap_or_default(),
            enabled_phases: serde_json::from_str(&self.enabled_phases).unwrap_or_default(),
            config: serde_json::from_str(&self.config).unwrap_or(serde_json::Value::Null),
            status: ExecutionStatus::parse(&self.status).unwrap_or_default(),
            started_at: timestamp_to_datetime(self.started_at),
            completed_at: self.completed_at.map(timestamp_to_datetime),
        }
    }
}

impl From<&PipelineExecution> for ExecutionRow {
    fn from(execution: &PipelineExecution) -> Self {
        Self {
            id: execution.id.to_string(),
            enabled_phases: serde_json::to_string(&execution.enabled_phases)
                .unwrap_or_else(|_| "[]".to_string()),
            config: execution.config.to_string(),
            status: execution.status.as_str().to_string(),
            started_at: datetime_to_timestamp(execution.started_at),
            completed_at: execution.completed_at.map(datetime_to_timestamp),
        }
    }
}

fn timestamp_to_datetime(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0).unwrap()
}

fn datetime_to_timestamp(dt: DateTime<Utc>) -> i64 {
    dt.timestamp()
}
