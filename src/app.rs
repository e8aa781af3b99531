use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::Router;
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::Method;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::info;
use uuid::Uuid;

use crate::db::metrics_queries;
use crate::errors::REQUEST_ID;
use crate::routes::{
    agents, alerts, analysis, comparison, earnings, errors_api, health, scheduler, state_api,
    stocks, stream, watchlists,
};
use crate::state::AppState;

/// Request wrapper: scopes a request id for error envelopes, stamps
/// X-Request-ID on the response, logs the completed request, and feeds the
/// in-memory latency buffer. Server errors additionally land in error_log.
async fn request_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let request_id = Uuid::new_v4().to_string();
    let started = std::time::Instant::now();

    let mut response = REQUEST_ID.scope(request_id.clone(), next.run(req)).await;

    let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
    let status = response.status();

    state
        .latency
        .record(&path, method.as_str(), status.as_u16(), duration_ms);
    info!(
        "{} {} -> {} ({:.1}ms) [{}]",
        method, path, status.as_u16(), duration_ms, request_id
    );

    if status.is_server_error() {
        let pool = state.pool.clone();
        let message = format!("{method} {path} returned {status}");
        let request_id_log = request_id.clone();
        tokio::spawn(async move {
            let _ = metrics_queries::insert_error(
                &pool,
                "backend",
                Some(crate::errors::codes::INTERNAL_ERROR),
                &message,
                None,
                Some(&request_id_log),
                None,
                "error",
                None,
            )
            .await;
        });
    }

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("X-Request-ID", value);
    }
    response
}

pub fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(|origin: &HeaderValue, _| {
            origin.as_bytes().starts_with(b"http://localhost:")
                || origin.as_bytes().starts_with(b"http://127.0.0.1:")
        }))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION]);

    Router::<AppState>::new()
        .nest("/api/health", health::router())
        .nest("/api", stream::router())
        .nest("/api", stocks::router())
        .nest("/api", watchlists::router())
        .nest("/api", alerts::router())
        .nest("/api", analysis::router())
        .nest("/api", agents::router())
        .nest("/api", scheduler::router())
        .nest("/api", comparison::router())
        .nest("/api", earnings::router())
        .nest("/api", errors_api::router())
        .nest("/api", state_api::router())
        .layer(middleware::from_fn_with_state(state.clone(), request_middleware))
        .with_state(state)
        .layer(cors)
}
