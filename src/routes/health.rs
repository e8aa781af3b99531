use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::json;

use crate::db::pool::pool_stats;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(detailed))
        .route("/ready", get(ready))
        .route("/live", get(live))
        .route("/status", get(status))
}

/// Detailed health: DB reachability, pool stats, realtime client counts.
async fn detailed(State(state): State<AppState>) -> impl IntoResponse {
    let db_ok = sqlx::query("SELECT 1").execute(&state.pool).await.is_ok();
    let stats = pool_stats(&state.pool);

    let body = json!({
        "status": if db_ok { "healthy" } else { "degraded" },
        "database": {
            "ok": db_ok,
            "pool": {
                "size": stats.size,
                "in_use": stats.in_use,
                "available": stats.available,
            },
        },
        "realtime": {
            "sse_clients": state.broadcaster.sse_client_count(),
            "ws_clients": state.broadcaster.ws_client_count(),
        },
        "timestamp": Utc::now().to_rfc3339(),
    });

    let code = if db_ok { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (code, Json(body))
}

/// Readiness: 200 only when the store answers.
async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    match sqlx::query("SELECT 1").execute(&state.pool).await {
        Ok(_) => (StatusCode::OK, "ready"),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "not ready"),
    }
}

/// Liveness: always 200 while the process serves requests.
async fn live() -> impl IntoResponse {
    (StatusCode::OK, "alive")
}

/// Cheap polling endpoint for frontend status indicators.
async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "ok": true,
        "sse_clients": state.broadcaster.sse_client_count(),
        "ws_clients": state.broadcaster.ws_client_count(),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}
