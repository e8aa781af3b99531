use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::Config;
use crate::external::registry::ProviderRegistry;
use crate::services::agent_service::AgentRegistry;
use crate::services::broadcast::Broadcaster;
use crate::services::job_scheduler::JobRegistry;
use crate::services::latency_buffer::LatencyBuffer;
use crate::services::settings_service::SettingsService;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub config: Arc<Config>,
    pub broadcaster: Arc<Broadcaster>,
    pub providers: Arc<ProviderRegistry>,
    pub settings: Arc<SettingsService>,
    pub agents: Arc<AgentRegistry>,
    pub jobs: Arc<JobRegistry>,
    pub latency: Arc<LatencyBuffer>,
}
