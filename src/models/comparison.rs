use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ==============================================================================
// Synchronous compare (/api/ai/compare)
// ==============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderChoice {
    pub provider: String,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompareRequest {
    pub ticker: String,
    pub providers: Vec<ProviderChoice>,
}

/// One provider's slot in a fan-out response. Slots keep their position in
/// the input order regardless of completion order.
#[derive(Debug, Clone, Serialize)]
pub struct CompareResult {
    pub provider: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub duration_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompareResponse {
    pub run_id: String,
    pub ticker: String,
    pub market_context: serde_json::Value,
    pub results: Vec<CompareResult>,
}

// ==============================================================================
// Asynchronous comparison runs (/api/comparison)
// ==============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct CreateComparisonRunRequest {
    pub prompt: Option<String>,
    pub ticker: Option<String>,
    pub provider_ids: Option<Vec<i64>>,
    pub provider_names: Option<Vec<String>>,
    pub template: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ComparisonRun {
    pub id: String,
    pub prompt: Option<String>,
    pub ticker: Option<String>,
    pub status: String,
    pub template: Option<String>,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ComparisonResult {
    pub id: i64,
    pub run_id: String,
    pub provider_name: String,
    pub model: Option<String>,
    pub response: Option<String>,
    pub tokens_used: i64,
    pub latency_ms: i64,
    pub error: Option<String>,
    pub extracted_rating: Option<String>,
    pub extracted_score: Option<i64>,
    pub extracted_confidence: Option<i64>,
    pub extracted_summary: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComparisonRunView {
    #[serde(flatten)]
    pub run: ComparisonRun,
    pub results: Vec<ComparisonResult>,
}

/// Structured fields extracted from a model response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedAnalysis {
    pub rating: String,
    pub score: i64,
    pub confidence: i64,
    pub summary: String,
}
