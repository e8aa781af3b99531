use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Offset, TimeZone, Utc};
use chrono_tz::Tz;
use futures::future::BoxFuture;
use regex::Regex;
use serde_json::json;
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::db::job_queries;
use crate::db::pool::ImmediateTx;
use crate::errors::AppError;
use crate::external::registry::ProviderRegistry;
use crate::models::job::{
    AgentSchedule, CreateAgentScheduleRequest, JobView, UpdateAgentScheduleRequest,
};
use crate::services::agent_service::AgentRegistry;
use crate::services::broadcast::Broadcaster;
use crate::services::latency_buffer::LatencyBuffer;
use crate::services::settings_service::SettingsService;

const MAX_INTERVAL_SECONDS: u64 = 52_560_000;

// ==============================================================================
// Triggers
// ==============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    Cron {
        hour: u32,
        minute: u32,
        day_of_week: Option<String>,
    },
    Interval {
        seconds: u64,
    },
}

fn day_of_week_re() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(mon|tue|wed|thu|fri|sat|sun|[0-6])(-(mon|tue|wed|thu|fri|sat|sun|[0-6]))?(,(mon|tue|wed|thu|fri|sat|sun|[0-6])(-(mon|tue|wed|thu|fri|sat|sun|[0-6]))?)*$",
        )
        .unwrap()
    })
}

// Monday-first indexing, matching the numeric day_of_week convention
// accepted on the API ("0" = Monday).
const DAY_NAMES: [&str; 7] = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];
const CRON_DAY_NAMES: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

fn day_index(token: &str) -> Option<usize> {
    if let Ok(n) = token.parse::<usize>() {
        return (n < 7).then_some(n);
    }
    DAY_NAMES.iter().position(|d| *d == token)
}

fn shift_day(index: usize, shift: i32) -> usize {
    ((index as i32 + shift).rem_euclid(7)) as usize
}

/// Rewrite a day-of-week expression ("mon-fri", "sun", "0,2-4") into cron
/// day names, shifted by `shift` days. The shift absorbs cron triggers whose
/// UTC conversion crosses a midnight boundary.
fn cron_day_expr(expr: &str, shift: i32) -> Option<String> {
    let mut out = Vec::new();
    for token in expr.split(',') {
        let mut parts = token.splitn(2, '-');
        let start = day_index(parts.next()?)?;
        match parts.next() {
            Some(end) => {
                let end = day_index(end)?;
                out.push(format!(
                    "{}-{}",
                    CRON_DAY_NAMES[shift_day(start, shift)],
                    CRON_DAY_NAMES[shift_day(end, shift)]
                ));
            }
            None => out.push(CRON_DAY_NAMES[shift_day(start, shift)].to_string()),
        }
    }
    Some(out.join(","))
}

impl Trigger {
    pub fn type_str(&self) -> &'static str {
        match self {
            Trigger::Cron { .. } => "cron",
            Trigger::Interval { .. } => "interval",
        }
    }

    pub fn args_json(&self) -> serde_json::Value {
        match self {
            Trigger::Cron { hour, minute, day_of_week } => {
                let mut args = json!({"hour": hour, "minute": minute});
                if let Some(dow) = day_of_week {
                    args["day_of_week"] = json!(dow);
                }
                args
            }
            Trigger::Interval { seconds } => json!({"seconds": seconds}),
        }
    }

    /// Parse and validate a (trigger_type, trigger_args) pair. Cron fields
    /// use explicit allowlists; interval seconds are range-checked.
    pub fn from_parts(trigger_type: &str, args: &serde_json::Value) -> Result<Trigger, AppError> {
        match trigger_type {
            "interval" => {
                let seconds = args
                    .get("seconds")
                    .and_then(|s| s.as_u64())
                    .ok_or_else(|| {
                        AppError::Validation("interval trigger requires 'seconds'".to_string())
                    })?;
                if !(1..=MAX_INTERVAL_SECONDS).contains(&seconds) {
                    return Err(AppError::Validation(format!(
                        "interval seconds must be in [1, {MAX_INTERVAL_SECONDS}]"
                    )));
                }
                Ok(Trigger::Interval { seconds })
            }
            "cron" => {
                let hour = args.get("hour").and_then(|h| h.as_u64()).ok_or_else(|| {
                    AppError::Validation("cron trigger requires 'hour'".to_string())
                })?;
                if hour > 23 {
                    return Err(AppError::Validation("hour must be in [0, 23]".to_string()));
                }
                let minute = args.get("minute").and_then(|m| m.as_u64()).unwrap_or(0);
                if minute > 59 {
                    return Err(AppError::Validation("minute must be in [0, 59]".to_string()));
                }
                let day_of_week = match args.get("day_of_week") {
                    None | Some(serde_json::Value::Null) => None,
                    Some(serde_json::Value::String(dow)) => {
                        let dow = dow.to_lowercase();
                        if !day_of_week_re().is_match(&dow) {
                            return Err(AppError::Validation(format!(
                                "invalid day_of_week: {dow:?}"
                            )));
                        }
                        Some(dow)
                    }
                    Some(other) => {
                        return Err(AppError::Validation(format!(
                            "day_of_week must be a string, got {other}"
                        )))
                    }
                };
                Ok(Trigger::Cron {
                    hour: hour as u32,
                    minute: minute as u32,
                    day_of_week,
                })
            }
            other => Err(AppError::Validation(format!("unknown trigger type: {other}"))),
        }
    }

    /// Six-field cron expression in UTC. Cron triggers are specified in the
    /// market timezone; the conversion uses the zone's current offset, so a
    /// DST transition shifts fire times by an hour until the job is
    /// reinstalled.
    pub fn to_utc_cron_expr(&self, tz: Tz) -> Option<String> {
        let Trigger::Cron { hour, minute, day_of_week } = self else {
            return None;
        };

        let offset_minutes =
            tz.offset_from_utc_datetime(&Utc::now().naive_utc()).fix().local_minus_utc() / 60;
        let local_minutes = (*hour as i32) * 60 + *minute as i32;
        let mut utc_minutes = local_minutes - offset_minutes;
        let mut day_shift = 0;
        if utc_minutes < 0 {
            utc_minutes += 1440;
            day_shift = -1;
        } else if utc_minutes >= 1440 {
            utc_minutes -= 1440;
            day_shift = 1;
        }

        let dow_expr = match day_of_week {
            Some(expr) => cron_day_expr(expr, day_shift)?,
            None => "*".to_string(),
        };
        Some(format!("0 {} {} * * {}", utc_minutes % 60, utc_minutes / 60, dow_expr))
    }

    pub fn describe(&self) -> String {
        match self {
            Trigger::Cron { hour, minute, day_of_week } => match day_of_week {
                Some(dow) => format!("cron[{hour:02}:{minute:02} {dow}]"),
                None => format!("cron[{hour:02}:{minute:02} daily]"),
            },
            Trigger::Interval { seconds } => format!("interval[{seconds}s]"),
        }
    }
}

// ==============================================================================
// Job context + registry
// ==============================================================================

/// Everything a job function needs, cloned into each firing.
#[derive(Clone)]
pub struct JobContext {
    pub pool: SqlitePool,
    pub config: Arc<Config>,
    pub broadcaster: Arc<Broadcaster>,
    pub providers: Arc<ProviderRegistry>,
    pub settings: Arc<SettingsService>,
    pub agents: Arc<AgentRegistry>,
    pub latency: Arc<LatencyBuffer>,
}

pub type JobFn = Arc<dyn Fn(JobContext) -> BoxFuture<'static, ()> + Send + Sync>;

struct RegisteredJob {
    name: &'static str,
    description: &'static str,
    func: JobFn,
    trigger: Trigger,
    enabled: bool,
    scheduler_id: Option<Uuid>,
    // Single-flight guard: an overlapping tick is skipped, not queued.
    running: Arc<Mutex<()>>,
}

/// Persistent job registry layered over the cron scheduler.
///
/// Triggers live in the `scheduler_jobs` table so a restart preserves
/// user-edited schedules; the in-memory registry holds the job functions and
/// the live scheduler handles. Schedule writes are serialised by a process
/// mutex plus a BEGIN IMMEDIATE transaction.
pub struct JobRegistry {
    scheduler: JobScheduler,
    jobs: Mutex<HashMap<String, RegisteredJob>>,
    order: Mutex<Vec<String>>,
    ctx: JobContext,
    timezone: Tz,
    schedule_write_lock: Mutex<()>,
}

impl JobRegistry {
    pub async fn new(ctx: JobContext) -> Result<Self, AppError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| AppError::Internal(format!("failed to create scheduler: {e}")))?;
        let timezone: Tz = ctx
            .config
            .market_timezone
            .parse()
            .unwrap_or(chrono_tz::America::New_York);

        Ok(Self {
            scheduler,
            jobs: Mutex::new(HashMap::new()),
            order: Mutex::new(Vec::new()),
            ctx,
            timezone,
            schedule_write_lock: Mutex::new(()),
        })
    }

    pub async fn register<F, Fut>(
        &self,
        job_id: &str,
        name: &'static str,
        description: &'static str,
        trigger: Trigger,
        func: F,
    ) where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let func: JobFn = Arc::new(move |ctx| Box::pin(func(ctx)));
        let mut jobs = self.jobs.lock().await;
        jobs.insert(
            job_id.to_string(),
            RegisteredJob {
                name,
                description,
                func,
                trigger,
                enabled: true,
                scheduler_id: None,
                running: Arc::new(Mutex::new(())),
            },
        );
        self.order.lock().await.push(job_id.to_string());
    }

    fn make_scheduler_job(&self, job_id: &str, job: &RegisteredJob) -> Result<Job, AppError> {
        let func = job.func.clone();
        let running = job.running.clone();
        let ctx = self.ctx.clone();
        let id_for_log = job_id.to_string();

        let run = move |_uuid: Uuid, _lock| {
            let func = func.clone();
            let running = running.clone();
            let ctx = ctx.clone();
            let id_for_log = id_for_log.clone();
            Box::pin(async move {
                let Ok(_guard) = running.try_lock() else {
                    debug!("job {} still running, skipping overlapping tick", id_for_log);
                    return;
                };
                func(ctx).await;
            }) as BoxFuture<'static, ()>
        };

        match &job.trigger {
            Trigger::Interval { seconds } => {
                Job::new_repeated_async(Duration::from_secs(*seconds), run)
                    .map_err(|e| AppError::Internal(format!("failed to create job {job_id}: {e}")))
            }
            Trigger::Cron { .. } => {
                let expr = job
                    .trigger
                    .to_utc_cron_expr(self.timezone)
                    .ok_or_else(|| AppError::Internal(format!("bad cron trigger for {job_id}")))?;
                Job::new_async(expr.as_str(), run)
                    .map_err(|e| AppError::Internal(format!("failed to create job {job_id}: {e}")))
            }
        }
    }

    async fn install(&self, job_id: &str) -> Result<(), AppError> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| AppError::NotFound(format!("job {job_id}")))?;

        if let Some(existing) = job.scheduler_id.take() {
            let mut scheduler = self.scheduler.clone();
            let _ = scheduler.remove(&existing).await;
        }

        let scheduler_job = self.make_scheduler_job(job_id, job)?;
        let mut scheduler = self.scheduler.clone();
        let scheduler_id = scheduler
            .add(scheduler_job)
            .await
            .map_err(|e| AppError::Internal(format!("failed to add job {job_id}: {e}")))?;
        job.scheduler_id = Some(scheduler_id);
        Ok(())
    }

    async fn uninstall(&self, job_id: &str) -> Result<(), AppError> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| AppError::NotFound(format!("job {job_id}")))?;
        if let Some(existing) = job.scheduler_id.take() {
            let mut scheduler = self.scheduler.clone();
            scheduler
                .remove(&existing)
                .await
                .map_err(|e| AppError::Internal(format!("failed to remove job {job_id}: {e}")))?;
        }
        Ok(())
    }

    /// Install every registered job and start the scheduler.
    ///
    /// A persisted `scheduler_jobs` row wins over the registered default, so
    /// user-edited schedules survive restarts.
    pub async fn start_all(&self) -> Result<(), AppError> {
        info!("starting job scheduler...");

        let persisted: HashMap<String, _> = job_queries::load_scheduler_jobs(&self.ctx.pool)
            .await?
            .into_iter()
            .map(|row| (row.job_id.clone(), row))
            .collect();

        let ids = self.order.lock().await.clone();
        for job_id in &ids {
            let restored = match persisted.get(job_id) {
                Some(row) => {
                    let args: serde_json::Value =
                        serde_json::from_str(&row.trigger_args).unwrap_or(json!({}));
                    match Trigger::from_parts(&row.trigger_type, &args) {
                        Ok(trigger) => Some((trigger, row.enabled != 0)),
                        Err(e) => {
                            warn!("persisted trigger for {} is invalid ({}), using default", job_id, e);
                            None
                        }
                    }
                }
                None => None,
            };

            {
                let mut jobs = self.jobs.lock().await;
                let Some(job) = jobs.get_mut(job_id) else {
                    continue;
                };
                if let Some((trigger, enabled)) = restored {
                    job.trigger = trigger;
                    job.enabled = enabled;
                } else {
                    // First sighting: persist the default.
                    let trigger_type = job.trigger.type_str();
                    let trigger_args = job.trigger.args_json().to_string();
                    let enabled = job.enabled;
                    drop(jobs);
                    let mut tx = ImmediateTx::begin(&self.ctx.pool).await?;
                    job_queries::persist_scheduler_job_on(
                        tx.conn(),
                        job_id,
                        trigger_type,
                        &trigger_args,
                        enabled,
                    )
                    .await?;
                    tx.commit().await?;
                }
            }

            let enabled = self.jobs.lock().await.get(job_id).map(|j| j.enabled).unwrap_or(false);
            if enabled {
                if let Err(e) = self.install(job_id).await {
                    error!("failed to schedule job {}: {}", job_id, e);
                }
            }
        }

        let mut scheduler = self.scheduler.clone();
        scheduler
            .start()
            .await
            .map_err(|e| AppError::Internal(format!("failed to start scheduler: {e}")))?;

        info!("job scheduler started with {} registered jobs", ids.len());
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<(), AppError> {
        let mut scheduler = self.scheduler.clone();
        scheduler
            .shutdown()
            .await
            .map_err(|e| AppError::Internal(format!("failed to stop scheduler: {e}")))?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------

    async fn persist_enabled(&self, job_id: &str, enabled: bool) -> Result<(), AppError> {
        let _guard = self.schedule_write_lock.lock().await;
        let mut tx = ImmediateTx::begin(&self.ctx.pool).await?;
        job_queries::set_scheduler_job_enabled_on(tx.conn(), job_id, enabled).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn pause(&self, job_id: &str) -> Result<(), AppError> {
        self.uninstall(job_id).await?;
        {
            let mut jobs = self.jobs.lock().await;
            if let Some(job) = jobs.get_mut(job_id) {
                job.enabled = false;
            }
        }
        self.persist_enabled(job_id, false).await?;
        info!("paused job: {}", job_id);
        Ok(())
    }

    pub async fn resume(&self, job_id: &str) -> Result<(), AppError> {
        {
            let mut jobs = self.jobs.lock().await;
            let job = jobs
                .get_mut(job_id)
                .ok_or_else(|| AppError::NotFound(format!("job {job_id}")))?;
            job.enabled = true;
        }
        self.install(job_id).await?;
        self.persist_enabled(job_id, true).await?;
        info!("resumed job: {}", job_id);
        Ok(())
    }

    /// Fire a job immediately via a one-shot scheduler entry. The job's
    /// single-flight guard still applies.
    pub async fn trigger_now(&self, job_id: &str) -> Result<(), AppError> {
        let scheduler_job = {
            let jobs = self.jobs.lock().await;
            let job = jobs
                .get(job_id)
                .ok_or_else(|| AppError::NotFound(format!("job {job_id}")))?;

            let func = job.func.clone();
            let running = job.running.clone();
            let ctx = self.ctx.clone();
            let id_for_log = job_id.to_string();
            Job::new_one_shot_async(Duration::from_millis(10), move |_uuid, _lock| {
                let func = func.clone();
                let running = running.clone();
                let ctx = ctx.clone();
                let id_for_log = id_for_log.clone();
                Box::pin(async move {
                    let Ok(_guard) = running.try_lock() else {
                        debug!("job {} already running, manual trigger skipped", id_for_log);
                        return;
                    };
                    func(ctx).await;
                }) as BoxFuture<'static, ()>
            })
            .map_err(|e| AppError::Internal(format!("failed to create one-shot for {job_id}: {e}")))?
        };

        let mut scheduler = self.scheduler.clone();
        scheduler
            .add(scheduler_job)
            .await
            .map_err(|e| AppError::Internal(format!("failed to trigger {job_id}: {e}")))?;
        info!("triggered immediate run of job: {}", job_id);
        Ok(())
    }

    /// Replace a job's trigger. Validation, persistence, and the push to the
    /// live scheduler run under the schedule write lock so two concurrent
    /// updates cannot interleave; the last committed row matches the live
    /// trigger.
    pub async fn update_schedule(&self, job_id: &str, trigger: Trigger) -> Result<(), AppError> {
        let _guard = self.schedule_write_lock.lock().await;

        {
            let jobs = self.jobs.lock().await;
            if !jobs.contains_key(job_id) {
                return Err(AppError::NotFound(format!("job {job_id}")));
            }
        }

        let mut tx = ImmediateTx::begin(&self.ctx.pool).await?;
        job_queries::persist_scheduler_job_on(
            tx.conn(),
            job_id,
            trigger.type_str(),
            &trigger.args_json().to_string(),
            true,
        )
        .await?;
        tx.commit().await?;

        {
            let mut jobs = self.jobs.lock().await;
            if let Some(job) = jobs.get_mut(job_id) {
                job.trigger = trigger;
                job.enabled = true;
            }
        }
        self.install(job_id).await?;
        info!("updated schedule for job {}", job_id);
        Ok(())
    }

    /// High-level interval helper: 0 pauses the job; anything else resumes
    /// it on the new interval.
    pub async fn reschedule(&self, job_id: &str, seconds: u64) -> Result<(), AppError> {
        if seconds == 0 {
            return self.pause(job_id).await;
        }
        self.update_schedule(job_id, Trigger::Interval { seconds }).await
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    async fn view(&self, job_id: &str, job: &RegisteredJob) -> JobView {
        let next_run = match job.scheduler_id {
            Some(uuid) => {
                let mut scheduler = self.scheduler.clone();
                scheduler
                    .next_tick_for_job(uuid)
                    .await
                    .ok()
                    .flatten()
                    .map(|dt| dt.to_rfc3339())
            }
            None => None,
        };
        JobView {
            id: job_id.to_string(),
            name: job.name.to_string(),
            description: job.description.to_string(),
            enabled: job.enabled,
            next_run,
            trigger: job.trigger.describe(),
            trigger_args: job.trigger.args_json(),
        }
    }

    pub async fn get_all_jobs(&self) -> Vec<JobView> {
        let ids = self.order.lock().await.clone();
        let jobs = self.jobs.lock().await;
        let mut out = Vec::with_capacity(ids.len());
        for id in &ids {
            if let Some(job) = jobs.get(id) {
                out.push(self.view(id, job).await);
            }
        }
        out
    }

    pub async fn get_job(&self, job_id: &str) -> Option<JobView> {
        let jobs = self.jobs.lock().await;
        match jobs.get(job_id) {
            Some(job) => Some(self.view(job_id, job).await),
            None => None,
        }
    }

    pub async fn is_known_job(&self, job_id: &str) -> bool {
        self.jobs.lock().await.contains_key(job_id)
    }

    // ------------------------------------------------------------------
    // Agent schedules (user-defined extra schedules for known jobs)
    // ------------------------------------------------------------------

    pub async fn list_agent_schedules(&self) -> Result<Vec<AgentSchedule>, AppError> {
        Ok(job_queries::list_agent_schedules(&self.ctx.pool).await?)
    }

    pub async fn create_agent_schedule(
        &self,
        req: CreateAgentScheduleRequest,
    ) -> Result<i64, AppError> {
        if !self.is_known_job(&req.job_id).await {
            return Err(AppError::NotFound(format!("job {}", req.job_id)));
        }
        let trigger = Trigger::from_parts(&req.trigger, &req.trigger_args)?;

        let _guard = self.schedule_write_lock.lock().await;
        let mut tx = ImmediateTx::begin(&self.ctx.pool).await?;
        let id = job_queries::insert_agent_schedule_on(
            tx.conn(),
            &req.job_id,
            trigger.type_str(),
            &trigger.args_json().to_string(),
        )
        .await?;
        tx.commit().await?;
        Ok(id)
    }

    /// Partial update. The new trigger_args are cross-validated against the
    /// effective trigger type — fetched inside the same immediate
    /// transaction — so a partial update can never commit an invalid pair.
    pub async fn update_agent_schedule(
        &self,
        id: i64,
        req: UpdateAgentScheduleRequest,
    ) -> Result<AgentSchedule, AppError> {
        let _guard = self.schedule_write_lock.lock().await;
        let mut tx = ImmediateTx::begin(&self.ctx.pool).await?;

        let existing = job_queries::get_agent_schedule_on(tx.conn(), id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("agent schedule {id}")))?;

        let trigger_type = req.trigger.clone().unwrap_or(existing.trigger_type.clone());
        let trigger_args = match &req.trigger_args {
            Some(args) => args.clone(),
            None => serde_json::from_str(&existing.trigger_args).unwrap_or(json!({})),
        };
        let trigger = match Trigger::from_parts(&trigger_type, &trigger_args) {
            Ok(t) => t,
            Err(e) => {
                tx.rollback().await.ok();
                return Err(e);
            }
        };
        let enabled = req.enabled.unwrap_or(existing.enabled != 0);

        job_queries::update_agent_schedule_on(
            tx.conn(),
            id,
            trigger.type_str(),
            &trigger.args_json().to_string(),
            enabled,
        )
        .await?;
        let updated = job_queries::get_agent_schedule_on(tx.conn(), id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("agent schedule {id}")))?;
        tx.commit().await?;
        Ok(updated)
    }

    pub async fn delete_agent_schedule(&self, id: i64) -> Result<bool, AppError> {
        Ok(job_queries::delete_agent_schedule(&self.ctx.pool, id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::init_all_tables;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn test_ctx() -> JobContext {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        init_all_tables(&pool).await.unwrap();
        let config = Arc::new(Config::from_env());
        let broadcaster = Arc::new(Broadcaster::new(50));
        JobContext {
            pool: pool.clone(),
            config: config.clone(),
            broadcaster: broadcaster.clone(),
            providers: Arc::new(ProviderRegistry::new(None)),
            settings: Arc::new(SettingsService::new(pool.clone())),
            agents: Arc::new(AgentRegistry::empty(pool)),
            latency: Arc::new(LatencyBuffer::new()),
        }
    }

    #[test]
    fn test_trigger_validation() {
        assert!(Trigger::from_parts("interval", &json!({"seconds": 60})).is_ok());
        assert!(Trigger::from_parts("interval", &json!({"seconds": 0})).is_err());
        assert!(Trigger::from_parts("interval", &json!({"seconds": 52_560_001u64})).is_err());
        assert!(Trigger::from_parts("interval", &json!({})).is_err());

        assert!(Trigger::from_parts("cron", &json!({"hour": 8, "minute": 30})).is_ok());
        assert!(Trigger::from_parts("cron", &json!({"hour": 24})).is_err());
        assert!(Trigger::from_parts("cron", &json!({"hour": 8, "minute": 60})).is_err());
        assert!(Trigger::from_parts(
            "cron",
            &json!({"hour": 8, "minute": 30, "day_of_week": "mon-fri"})
        )
        .is_ok());
        assert!(Trigger::from_parts(
            "cron",
            &json!({"hour": 8, "day_of_week": "mon-funday"})
        )
        .is_err());
        assert!(Trigger::from_parts("date", &json!({})).is_err());
    }

    #[test]
    fn test_day_of_week_patterns() {
        for good in ["mon", "sun", "mon-fri", "0", "0-4", "mon,wed,fri", "sat,sun", "1-3,5"] {
            assert!(day_of_week_re().is_match(good), "{good} should match");
        }
        for bad in ["monday", "mon-", "7", "mon--fri", ""] {
            assert!(!day_of_week_re().is_match(bad), "{bad} should not match");
        }
    }

    #[test]
    fn test_cron_day_expr_shifting() {
        assert_eq!(cron_day_expr("mon-fri", 0).unwrap(), "Mon-Fri");
        assert_eq!(cron_day_expr("sun", 1).unwrap(), "Mon");
        assert_eq!(cron_day_expr("mon", -1).unwrap(), "Sun");
        assert_eq!(cron_day_expr("0,2-4", 0).unwrap(), "Mon,Wed-Fri");
    }

    #[test]
    fn test_utc_cron_conversion() {
        // 08:30 New York is 12:30 or 13:30 UTC depending on DST; either way
        // the minute field survives and the expression parses as 6 fields.
        let trigger = Trigger::Cron { hour: 8, minute: 30, day_of_week: Some("mon-fri".into()) };
        let expr = trigger.to_utc_cron_expr(chrono_tz::America::New_York).unwrap();
        let fields: Vec<&str> = expr.split(' ').collect();
        assert_eq!(fields.len(), 6);
        assert_eq!(fields[0], "0");
        assert_eq!(fields[1], "30");
        assert!(fields[2] == "12" || fields[2] == "13");
        assert_eq!(fields[5], "Mon-Fri");

        // India's half-hour offset shifts the minute field.
        let trigger = Trigger::Cron { hour: 9, minute: 15, day_of_week: None };
        let expr = trigger.to_utc_cron_expr(chrono_tz::Asia::Kolkata).unwrap();
        let fields: Vec<&str> = expr.split(' ').collect();
        assert_eq!(fields[1], "45");
        assert_eq!(fields[2], "3");
    }

    #[tokio::test]
    async fn test_register_pause_resume_reschedule() {
        let ctx = test_ctx().await;
        let registry = JobRegistry::new(ctx).await.unwrap();
        registry
            .register("noop", "No-op", "does nothing", Trigger::Interval { seconds: 3600 }, |_ctx| async {})
            .await;
        registry.start_all().await.unwrap();

        let view = registry.get_job("noop").await.unwrap();
        assert!(view.enabled);
        assert!(view.next_run.is_some());

        registry.pause("noop").await.unwrap();
        let view = registry.get_job("noop").await.unwrap();
        assert!(!view.enabled);
        assert!(view.next_run.is_none());

        registry.resume("noop").await.unwrap();
        let view = registry.get_job("noop").await.unwrap();
        assert!(view.enabled);

        // reschedule(0) pauses; reschedule(n) resumes on the new interval.
        registry.reschedule("noop", 0).await.unwrap();
        assert!(!registry.get_job("noop").await.unwrap().enabled);
        registry.reschedule("noop", 120).await.unwrap();
        let view = registry.get_job("noop").await.unwrap();
        assert!(view.enabled);
        assert_eq!(view.trigger_args, json!({"seconds": 120}));

        registry.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_persisted_trigger_wins_over_default() {
        let ctx = test_ctx().await;
        let pool = ctx.pool.clone();

        // First process lifetime: register + customise.
        {
            let registry = JobRegistry::new(ctx.clone()).await.unwrap();
            registry
                .register("job_a", "Job A", "d", Trigger::Interval { seconds: 60 }, |_ctx| async {})
                .await;
            registry.start_all().await.unwrap();
            registry
                .update_schedule("job_a", Trigger::Interval { seconds: 7200 })
                .await
                .unwrap();
            registry.shutdown().await.unwrap();
        }

        // Restart: the default is 60s again, but the persisted row wins.
        {
            let ctx = JobContext { pool: pool.clone(), ..ctx };
            let registry = JobRegistry::new(ctx).await.unwrap();
            registry
                .register("job_a", "Job A", "d", Trigger::Interval { seconds: 60 }, |_ctx| async {})
                .await;
            registry.start_all().await.unwrap();

            let view = registry.get_job("job_a").await.unwrap();
            assert_eq!(view.trigger_args, json!({"seconds": 7200}));
            registry.shutdown().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_trigger_now_invokes_job_function() {
        let ctx = test_ctx().await;
        let registry = JobRegistry::new(ctx).await.unwrap();

        static FIRED: AtomicUsize = AtomicUsize::new(0);
        registry
            .register(
                "counter",
                "Counter",
                "counts firings",
                // Long interval so only the manual trigger can fire in-test.
                Trigger::Interval { seconds: 3600 },
                |_ctx| async {
                    FIRED.fetch_add(1, Ordering::SeqCst);
                },
            )
            .await;
        registry.start_all().await.unwrap();

        registry.trigger_now("counter").await.unwrap();
        // The one-shot fires within a second.
        for _ in 0..20 {
            if FIRED.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(FIRED.load(Ordering::SeqCst), 1);
        registry.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_agent_schedule_cross_validation() {
        let ctx = test_ctx().await;
        let registry = JobRegistry::new(ctx).await.unwrap();
        registry
            .register("job_b", "Job B", "d", Trigger::Interval { seconds: 60 }, |_ctx| async {})
            .await;

        // Unknown job id rejected.
        let unknown = registry
            .create_agent_schedule(CreateAgentScheduleRequest {
                job_id: "ghost".into(),
                trigger: "interval".into(),
                trigger_args: json!({"seconds": 60}),
            })
            .await;
        assert!(matches!(unknown, Err(AppError::NotFound(_))));

        let id = registry
            .create_agent_schedule(CreateAgentScheduleRequest {
                job_id: "job_b".into(),
                trigger: "cron".into(),
                trigger_args: json!({"hour": 6, "minute": 0}),
            })
            .await
            .unwrap();

        // Partial update supplying args that are invalid for the effective
        // trigger type must fail atomically.
        let bad = registry
            .update_agent_schedule(
                id,
                UpdateAgentScheduleRequest {
                    trigger: Some("interval".into()),
                    trigger_args: None, // existing args are cron-shaped
                    enabled: None,
                },
            )
            .await;
        assert!(bad.is_err());

        // And the row is unchanged.
        let rows = registry.list_agent_schedules().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].trigger_type, "cron");

        let updated = registry
            .update_agent_schedule(
                id,
                UpdateAgentScheduleRequest {
                    trigger: Some("interval".into()),
                    trigger_args: Some(json!({"seconds": 900})),
                    enabled: Some(false),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.trigger_type, "interval");
        assert_eq!(updated.enabled, 0);
    }
}
