use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JobHistory {
    pub id: i64,
    pub job_id: String,
    pub job_name: String,
    pub status: String,
    pub result_summary: Option<String>,
    pub agent_name: Option<String>,
    pub duration_ms: i64,
    pub cost: f64,
    pub executed_at: Option<String>,
}

/// Persisted trigger row from the scheduler job store.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SchedulerJobRow {
    pub job_id: String,
    pub trigger_type: String,
    pub trigger_args: String,
    pub enabled: i64,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AgentSchedule {
    pub id: i64,
    pub job_id: String,
    pub trigger_type: String,
    pub trigger_args: String,
    pub enabled: i64,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateAgentScheduleRequest {
    pub job_id: String,
    pub trigger: String,
    pub trigger_args: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateAgentScheduleRequest {
    pub trigger: Option<String>,
    pub trigger_args: Option<serde_json::Value>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateScheduleRequest {
    pub trigger: String,
    pub trigger_args: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RescheduleRequest {
    pub seconds: u64,
}

/// Live view of a registered job, combining registry metadata with the
/// running scheduler entry.
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    pub id: String,
    pub name: String,
    pub description: String,
    pub enabled: bool,
    pub next_run: Option<String>,
    pub trigger: String,
    pub trigger_args: serde_json::Value,
}
