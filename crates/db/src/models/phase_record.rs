use chrono::{DateTime, TimeZone, Utc};
use serplens_core::{PhaseRecord, PhaseStatus};
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PhaseRecordRow {
    pub pipeline_execution_id: String,
    pub phase_name: String,
    pub status: String,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub result_data: Option<String>,
    pub error_message: Option<String>,
    pub blocked_by: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl PhaseRecordRow {
    pub fn into_domain(self) -> PhaseRecord {
        PhaseRecord {
            execution_id: Uuid::parse_str(&self.pipeline_execution_id).unwrap_or_default(),
            phase_name: self.phase_name,
            status: PhaseStatus::parse(&self.status).unwrap_or_default(),
            started_at: self.started_at.map(timestamp_to_datetime),
            completed_at: self.completed_at.map(timestamp_to_datetime),
            result_data: self
                .result_data
                .and_then(|data| serde_json::from_str(&data).ok()),
            error_message: self.error_message,
            blocked_by: self.blocked_by,
            created_at: timestamp_to_datetime(self.created_at),
            updated_at: timestamp_to_datetime(self.updated_at),
        }
    }
}

impl From<&PhaseRecord> for PhaseRecordRow {
    fn from(record: &PhaseRecord) -> Self {
        Self {
            pipeline_execution_id: record.execution_id.to_string(),
            phase_name: record.phase_name.clone(),
            status: record.status.as_str().to_string(),
            started_at: record.started_at.map(datetime_to_timestamp),
            completed_at: record.completed_at.map(datetime_to_timestamp),
            result_data: record.result_data.as_ref().map(|data| data.to_string()),
            error_message: record.error_message.clone(),
            blocked_by: record.blocked_by.clone(),
            created_at: datetime_to_timestamp(record.created_at),
            updated_at: datetime_to_timestamp(record.updated_at),
        }
    }
}

fn timestamp_to_datetime(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0).unwrap()
}

fn datetime_to_timestamp(dt: DateTime<Utc>) -> i64 {
    dt.timestamp()
}
