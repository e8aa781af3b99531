use std::net::{IpAddr, SocketAddr};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::json;

use crate::db::metrics_queries;
use crate::errors::AppError;
use crate::state::AppState;

const MAX_ERRORS_PER_MINUTE: usize = 10;
const MAX_PAYLOAD_BYTES: usize = 65_536;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/errors", post(ingest_error))
        .route("/errors/stats", get(error_stats))
}

// Per-IP ingestion limiter; frontend error storms must not flood the log.
static INGEST_WINDOWS: OnceLock<DashMap<IpAddr, Vec<Instant>>> = OnceLock::new();

fn check_rate_limit(ip: IpAddr) -> bool {
    let windows = INGEST_WINDOWS.get_or_init(DashMap::new);
    let now = Instant::now();
    let mut window = windows.entry(ip).or_default();
    window.retain(|t| now.duration_since(*t) < Duration::from_secs(60));
    if window.len() >= MAX_ERRORS_PER_MINUTE {
        return false;
    }
    window.push(now);
    true
}

#[derive(Debug, Deserialize)]
struct IngestErrorRequest {
    source: Option<String>,
    error_code: Option<String>,
    message: String,
    stack: Option<String>,
    context: Option<serde_json::Value>,
    severity: Option<String>,
    session_id: Option<String>,
}

async fn ingest_error(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(req): Json<IngestErrorRequest>,
) -> Result<impl IntoResponse, AppError> {
    if !check_rate_limit(addr.ip()) {
        return Err(AppError::RateLimited);
    }

    let context = req.context.map(|c| c.to_string());
    let approx_size = req.message.len()
        + req.stack.as_deref().map(str::len).unwrap_or(0)
        + context.as_deref().map(str::len).unwrap_or(0);
    if approx_size > MAX_PAYLOAD_BYTES {
        return Err(AppError::PayloadTooLarge);
    }

    let source = match req.source.as_deref() {
        Some("electron") => "electron",
        _ => "frontend",
    };
    let severity = match req.severity.as_deref() {
        Some("warning") => "warning",
        Some("info") => "info",
        _ => "error",
    };

    metrics_queries::insert_error(
        &state.pool,
        source,
        req.error_code.as_deref(),
        &req.message,
        req.stack.as_deref(),
        None,
        context.as_deref(),
        severity,
        req.session_id.as_deref(),
    )
    .await?;

    Ok(StatusCode::CREATED)
}

#[derive(Debug, Deserialize)]
struct StatsParams {
    window: Option<i64>,
}

async fn error_stats(
    State(state): State<AppState>,
    Query(params): Query<StatsParams>,
) -> Result<impl IntoResponse, AppError> {
    let window = params.window.unwrap_or(7).clamp(1, 90);
    let rows = metrics_queries::error_stats(&state.pool, window).await?;
    Ok(Json(json!({
        "window_days": window,
        "by_source": rows
            .into_iter()
            .map(|(source, severity, count)| json!({
                "source": source,
                "severity": severity,
                "count": count,
            }))
            .collect::<Vec<_>>(),
    })))
}
