use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use tickerpulse_backend::app::create_app;
use tickerpulse_backend::config::Config;
use tickerpulse_backend::db::{pool, schema};
use tickerpulse_backend::external::rate_tracker::RateLimitSink;
use tickerpulse_backend::external::registry::ProviderRegistry;
use tickerpulse_backend::jobs::register_all_jobs;
use tickerpulse_backend::logging::{init_logging, LoggingConfig};
use tickerpulse_backend::services::agent_service::AgentRegistry;
use tickerpulse_backend::services::broadcast::Broadcaster;
use tickerpulse_backend::services::job_scheduler::{JobContext, JobRegistry};
use tickerpulse_backend::services::latency_buffer::LatencyBuffer;
use tickerpulse_backend::services::settings_service::SettingsService;
use tickerpulse_backend::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    init_logging(LoggingConfig::from_env())?;

    let config = Arc::new(Config::from_env());

    let pool = pool::open_pool(&config).await?;
    schema::init_all_tables(&pool).await?;

    let broadcaster = Arc::new(Broadcaster::new(config.ws_max_subscriptions_per_client));
    let sink = RateLimitSink {
        broadcaster: Some(broadcaster.clone()),
        pool: Some(pool.clone()),
    };
    let providers = Arc::new(ProviderRegistry::from_config(
        &config,
        sink,
        broadcaster.clone(),
    ));
    let settings = Arc::new(SettingsService::new(pool.clone()));
    let agents = Arc::new(AgentRegistry::from_config(pool.clone(), &config).await);
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
    let jobs = Arc::new(JobRegistry::new(ctx).await?);
    register_all_jobs(&jobs, &config).await;
    jobs.start_all().await?;

    let state = AppState {
        pool,
        config: config.clone(),
        broadcaster,
        providers,
        settings,
        agents,
        jobs,
        latency,
    };
    let app = create_app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(&addr).await?;
    info!("TickerPulse backend running at http://{}/", addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
