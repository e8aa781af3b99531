//! HTTP surface tests driving the assembled router with tower's oneshot.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::connect_info::ConnectInfo;
use axum::http::{Request, StatusCode};
use sqlx::sqlite::SqlitePoolOptions;
use tower::util::ServiceExt;

use tickerpulse_backend::app::create_app;
use tickerpulse_backend::config::Config;
use tickerpulse_backend::db::schema;
use tickerpulse_backend::external::registry::ProviderRegistry;
use tickerpulse_backend::jobs::register_all_jobs;
use tickerpulse_backend::services::agent_service::AgentRegistry;
use tickerpulse_backend::services::broadcast::Broadcaster;
use tickerpulse_backend::services::job_scheduler::{JobContext, JobRegistry};
use tickerpulse_backend::services::latency_buffer::LatencyBuffer;
use tickerpulse_backend::services::settings_service::SettingsService;
use tickerpulse_backend::state::AppState;

async fn test_state() -> AppState {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    schema::init_all_tables(&pool).await.unwrap();

    let config = Arc::new(Config::from_env());
    let broadcaster = Arc::new(Broadcaster::new(50));
    let providers = Arc::new(ProviderRegistry::new(None));
    let settings = Arc::new(SettingsService::new(pool.clone()));
    let agents = Arc::new(AgentRegistry::empty(pool.clone()));
    let latency = Arc::new(LatencyBuffer::new());

    let ctx = JobContext {
        pool: pool.clone(),
        config: config.clone(),
        broadcaster: broadcaster.clone(),
        providers: providers.clone(),
        settings: settings.clone(),
        agents: agents.clone(),
        latency: latency.clone(),
    };
    let jobs = Arc::new(JobRegistry::new(ctx).await.unwrap());
    register_all_jobs(&jobs, &config).await;
    jobs.start_all().await.unwrap();

    AppState {
        pool,
        config,
        broadcaster,
        providers,
        settings,
        agents,
        jobs,
        latency,
    }
}

fn with_connect_info(mut request: Request<Body>) -> Request<Body> {
    let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();
    request.extensions_mut().insert(ConnectInfo(addr));
    request
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_endpoints_respond() {
    let app = create_app(test_state().await);

    let response = app
        .clone()
        .oneshot(Request::get("/api/health/live").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(Request::get("/api/health/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    // Every response carries a request id.
    assert!(response.headers().contains_key("X-Request-ID"));
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn alert_crud_and_validation_envelope() {
    let app = create_app(test_state().await);

    // Invalid condition type: 400 with the error envelope.
    let response = app
        .clone()
        .oneshot(
            Request::post("/api/alerts")
                .header("content-type", "application/json")
                .body(Body::from(
                    r#"{"ticker": "AAPL", "condition_type": "nonsense", "threshold": 100.0}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error_code"], "VALIDATION_ERROR");
    assert!(body["request_id"].is_string());

    // Create, list, rearm, delete.
    let response = app
        .clone()
        .oneshot(
            Request::post("/api/alerts")
                .header("content-type", "application/json")
                .body(Body::from(
                    r#"{"ticker": "AAPL", "condition_type": "price_above", "threshold": 200.0}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    assert_eq!(created["ticker"], "AAPL");
    assert_eq!(created["sound_type"], "default");
    let id = created["id"].as_i64().unwrap();

    let response = app
        .clone()
        .oneshot(Request::get("/api/alerts").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let listed = body_json(response).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let response = app
        .clone()
        .oneshot(
            Request::post(format!("/api/alerts/{id}/rearm"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(
            Request::delete(format!("/api/alerts/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn scheduler_endpoints_list_and_pause() {
    let app = create_app(test_state().await);

    let response = app
        .clone()
        .oneshot(Request::get("/api/scheduler/jobs").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let jobs = body_json(response).await;
    let jobs = jobs.as_array().unwrap();
    assert_eq!(jobs.len(), 11);
    assert!(jobs.iter().any(|j| j["id"] == "price_refresh"));

    let response = app
        .clone()
        .oneshot(
            Request::post("/api/scheduler/jobs/price_refresh/pause")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(
            Request::get("/api/scheduler/jobs/price_refresh")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let job = body_json(response).await;
    assert_eq!(job["enabled"], false);

    // Unknown job surfaces NOT_FOUND in the envelope.
    let response = app
        .oneshot(
            Request::post("/api/scheduler/jobs/ghost/pause")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error_code"], "NOT_FOUND");
}

#[tokio::test]
async fn error_ingestion_is_rate_limited_per_ip() {
    let app = create_app(test_state().await);

    let make_request = || {
        with_connect_info(
            Request::post("/api/errors")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"message": "frontend exploded", "source": "frontend"}"#))
                .unwrap(),
        )
    };

    for _ in 0..10 {
        let response = app.clone().oneshot(make_request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }
    // Eleventh within the window: throttled.
    let response = app.oneshot(make_request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn app_state_round_trip() {
    let app = create_app(test_state().await);

    let response = app
        .clone()
        .oneshot(
            Request::put("/api/app-state/dashboard-layout")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"columns": 3}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .oneshot(
            Request::get("/api/app-state/dashboard-layout")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["value"]["columns"], 3);
}
