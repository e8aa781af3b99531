use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};

use crate::db::alert_queries;
use crate::errors::AppError;
use crate::models::alert::{
    validate_sound_type, CreateAlertRequest, UpdateAlertRequest, UpdateAlertSoundRequest,
    UpdateGlobalSoundSettings,
};
use crate::services::alert_service;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/alerts", get(list_alerts))
        .route("/alerts", post(create_alert))
        .route("/alerts/sound-settings", get(get_sound_settings))
        .route("/alerts/sound-settings", put(update_sound_settings))
        .route("/alerts/:id", put(update_alert))
        .route("/alerts/:id", delete(delete_alert))
        .route("/alerts/:id/toggle", post(toggle_alert))
        .route("/alerts/:id/sound", put(set_alert_sound))
        .route("/alerts/:id/test", post(test_fire))
        .route("/alerts/:id/rearm", post(rearm))
}

async fn list_alerts(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(alert_queries::get_all_alerts(&state.pool).await?))
}

async fn create_alert(
    State(state): State<AppState>,
    Json(req): Json<CreateAlertRequest>,
) -> Result<impl IntoResponse, AppError> {
    let alert = alert_service::create_alert(&state.pool, req).await?;
    Ok((StatusCode::CREATED, Json(alert)))
}

async fn update_alert(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateAlertRequest>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(alert_service::update_alert(&state.pool, id, req).await?))
}

async fn delete_alert(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    if !alert_queries::delete_alert(&state.pool, id).await? {
        return Err(AppError::NotFound("alert".to_string()));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn toggle_alert(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let alert = alert_queries::toggle_alert(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound("alert".to_string()))?;
    Ok(Json(alert))
}

async fn set_alert_sound(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateAlertSoundRequest>,
) -> Result<impl IntoResponse, AppError> {
    let safe = validate_sound_type(&req.sound_type);
    let alert = alert_queries::set_alert_sound(&state.pool, id, safe)
        .await?
        .ok_or_else(|| AppError::NotFound("alert".to_string()))?;
    Ok(Json(alert))
}

/// Preview button: emits the SSE payload a real fire would produce without
/// touching the row.
async fn test_fire(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let payload =
        alert_service::fire_test_alert(&state.pool, &state.settings, &state.broadcaster, id).await?;
    Ok(Json(payload))
}

/// Explicit re-arm: clears triggered_at so the alert can fire again.
/// Toggling `enabled` intentionally does NOT re-arm.
async fn rearm(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let alert = alert_queries::rearm_alert(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound("alert".to_string()))?;
    Ok(Json(alert))
}

async fn get_sound_settings(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.settings.global_sound_settings().await)
}

async fn update_sound_settings(
    State(state): State<AppState>,
    Json(req): Json<UpdateGlobalSoundSettings>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.settings.update_global_sound_settings(req).await?))
}
