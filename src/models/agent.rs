use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AgentRun {
    pub id: i64,
    pub agent_name: String,
    pub framework: String,
    pub status: String,
    pub input_data: Option<String>,
    pub output_data: Option<String>,
    pub tokens_input: i64,
    pub tokens_output: i64,
    pub estimated_cost: f64,
    pub duration_ms: i64,
    pub error: Option<String>,
    pub metadata: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub created_at: Option<String>,
}

/// Result of one agent invocation, before persistence.
#[derive(Debug, Clone, Serialize)]
pub struct AgentResult {
    pub output: serde_json::Value,
    pub tokens_input: i64,
    pub tokens_output: i64,
    pub estimated_cost: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunAgentRequest {
    pub agent: String,
    #[serde(default)]
    pub inputs: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentCostDay {
    pub day: String,
    pub runs: i64,
    pub total_cost: f64,
    pub tokens_input: i64,
    pub tokens_output: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentCostByAgent {
    pub agent_name: String,
    pub runs: i64,
    pub total_cost: f64,
    pub avg_duration_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentCostSummary {
    pub window_days: i64,
    pub total_cost: f64,
    pub total_runs: i64,
    pub by_agent: Vec<AgentCostByAgent>,
    pub by_day: Vec<AgentCostDay>,
}
