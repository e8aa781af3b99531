//! Scheduled job definitions.
//!
//! Each module defines one job (the digest jobs share a module); every job
//! body runs through the `helpers::run_job` timer so history, metrics, and
//! the job_completed SSE event are uniform across the fleet.
//! `register_all_jobs` wires them into the registry with their default
//! triggers; persisted user edits override these at startup.

pub mod briefings;
pub mod download_tracker;
pub mod earnings_sync;
pub mod helpers;
pub mod metrics_snapshot;
pub mod portfolio_snapshot;
pub mod price_refresh;
pub mod reddit_scanner;
pub mod regime_check;
pub mod technical_monitor;

use crate::config::Config;
use crate::services::job_scheduler::{JobRegistry, Trigger};

pub async fn register_all_jobs(registry: &JobRegistry, config: &Config) {
    // Price Refresh: configurable interval; 0 in settings means manual mode.
    registry
        .register(
            "price_refresh",
            "Price Refresh",
            "Fetches live prices for all watchlist tickers, pushes realtime \
             price updates, and evaluates price alerts.",
            Trigger::Interval {
                seconds: config.price_refresh_interval_seconds.max(1),
            },
            price_refresh::run_price_refresh,
        )
        .await;

    // Technical Monitor: every 15 min during market hours.
    registry
        .register(
            "technical_monitor",
            "Technical Monitor",
            "RSI/MACD/MA signals for the watchlist with breakout alerts. \
             Skips when the market is closed.",
            Trigger::Interval { seconds: 15 * 60 },
            technical_monitor::run_technical_monitor,
        )
        .await;

    // Reddit Scanner: hourly.
    registry
        .register(
            "reddit_scanner",
            "Reddit Scanner",
            "Scans retail-investor forums for trending ticker mentions and \
             unusual activity.",
            Trigger::Interval { seconds: 60 * 60 },
            reddit_scanner::run_reddit_scan,
        )
        .await;

    // Regime Check: every 2 hours during market hours.
    registry
        .register(
            "regime_check",
            "Regime Check",
            "Quick market health pulse check classifying the current regime \
             (bull/bear/neutral/volatile). Skips when the market is closed.",
            Trigger::Interval { seconds: 2 * 60 * 60 },
            regime_check::run_regime_check,
        )
        .await;

    // Morning Briefing: 8:30 AM ET, weekdays.
    registry
        .register(
            "morning_briefing",
            "Morning Briefing",
            "Pre-market summary with overnight moves, pre-market movers, and \
             market regime assessment.",
            Trigger::Cron { hour: 8, minute: 30, day_of_week: Some("mon-fri".into()) },
            briefings::run_morning_briefing,
        )
        .await;

    // Daily Summary: 4:30 PM ET, weekdays.
    registry
        .register(
            "daily_summary",
            "Daily Summary",
            "End-of-day digest with closing prices, regime assessment, and a \
             job execution recap.",
            Trigger::Cron { hour: 16, minute: 30, day_of_week: Some("mon-fri".into()) },
            briefings::run_daily_summary,
        )
        .await;

    // Weekly Review: Sunday 8:00 PM ET.
    registry
        .register(
            "weekly_review",
            "Weekly Review",
            "Comprehensive weekly review with performance, regime trends, and \
             agent cost tracking.",
            Trigger::Cron { hour: 20, minute: 0, day_of_week: Some("sun".into()) },
            briefings::run_weekly_review,
        )
        .await;

    // Earnings Sync: nightly at 6:00 AM ET.
    registry
        .register(
            "earnings_sync",
            "Earnings Sync",
            "Syncs earnings calendar data (upcoming dates, EPS estimates, and \
             historical actuals) for all watchlist tickers.",
            Trigger::Cron { hour: 6, minute: 0, day_of_week: None },
            earnings_sync::run_earnings_sync,
        )
        .await;

    // Download Tracker: 9:00 AM ET daily.
    registry
        .register(
            "download_tracker",
            "Download Tracker",
            "Tracks GitHub repository clone statistics for the configured \
             repositories.",
            Trigger::Cron { hour: 9, minute: 0, day_of_week: None },
            download_tracker::run_download_tracker,
        )
        .await;

    // Metrics Snapshot: every 5 minutes.
    registry
        .register(
            "metrics_snapshot",
            "Metrics Snapshot",
            "Captures system and pool metrics, drains the API latency buffer, \
             and prunes metrics tables.",
            Trigger::Interval { seconds: 5 * 60 },
            metrics_snapshot::run_metrics_snapshot,
        )
        .await;

    // Portfolio Snapshot: weekday market close.
    registry
        .register(
            "portfolio_snapshot",
            "Portfolio Snapshot",
            "Values portfolio positions at current prices and records a daily \
             snapshot.",
            Trigger::Cron { hour: 16, minute: 10, day_of_week: Some("mon-fri".into()) },
            portfolio_snapshot::run_portfolio_snapshot,
        )
        .await;
}
