use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde_json::json;
use sqlx::SqlitePool;
use tracing::debug;

use crate::db::metrics_queries;
use crate::services::broadcast::Broadcaster;

const WINDOW_SECONDS: i64 = 60;

/// Usage level after one tracked request, plus whether a threshold bucket
/// boundary was crossed in a direction worth announcing.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitStatus {
    pub used: i64,
    pub max: i64,
    pub reset_at: Option<String>,
    pub crossed_bucket: Option<i64>,
}

struct TrackerInner {
    timestamps: VecDeque<DateTime<Utc>>,
    last_level: i64,
}

/// Rolling 60-second request counter for one provider.
///
/// Crossing the 70%, 90%, or 100% usage buckets upward, or dropping back to
/// 0, produces a `crossed_bucket` the sink turns into one SSE event.
pub struct RateTracker {
    provider_name: &'static str,
    rate_limit_per_minute: i64,
    inner: Mutex<TrackerInner>,
}

impl RateTracker {
    pub fn new(provider_name: &'static str, rate_limit_per_minute: i64) -> Self {
        Self {
            provider_name,
            rate_limit_per_minute,
            inner: Mutex::new(TrackerInner {
                timestamps: VecDeque::new(),
                last_level: 0,
            }),
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider_name
    }

    fn pct_level(used: i64, max: i64) -> i64 {
        if max <= 0 {
            return 0;
        }
        let pct = used as f64 / max as f64 * 100.0;
        if pct >= 100.0 {
            100
        } else if pct >= 90.0 {
            90
        } else if pct >= 70.0 {
            70
        } else {
            0
        }
    }

    fn reset_at(timestamps: &VecDeque<DateTime<Utc>>) -> Option<String> {
        timestamps
            .front()
            .map(|first| (*first + Duration::seconds(WINDOW_SECONDS)).to_rfc3339())
    }

    /// Record one request at `now` and report the updated window.
    pub fn track_at(&self, now: DateTime<Utc>) -> RateLimitStatus {
        let mut inner = self.inner.lock();
        inner.timestamps.push_back(now);

        let cutoff = now - Duration::seconds(WINDOW_SECONDS);
        while inner
            .timestamps
            .front()
            .is_some_and(|first| *first < cutoff)
        {
            inner.timestamps.pop_front();
        }

        let used = inner.timestamps.len() as i64;
        let max = self.rate_limit_per_minute;
        let reset_at = Self::reset_at(&inner.timestamps);
        let new_level = Self::pct_level(used, max);

        // Announce upward crossings and the drop back to 0, once each.
        let crossed = if new_level != inner.last_level
            && (new_level > inner.last_level || new_level == 0)
        {
            Some(new_level)
        } else {
            None
        };
        inner.last_level = new_level;

        RateLimitStatus {
            used,
            max,
            reset_at,
            crossed_bucket: crossed,
        }
    }

    pub fn track(&self) -> RateLimitStatus {
        self.track_at(Utc::now())
    }

    /// Current usage without recording a request; expired entries are pruned
    /// first so callers always see a live view.
    pub fn status(&self) -> (i64, i64, Option<String>) {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        let cutoff = now - Duration::seconds(WINDOW_SECONDS);
        while inner
            .timestamps
            .front()
            .is_some_and(|first| *first < cutoff)
        {
            inner.timestamps.pop_front();
        }
        (
            inner.timestamps.len() as i64,
            self.rate_limit_per_minute,
            Self::reset_at(&inner.timestamps),
        )
    }
}

/// Destination for rate-limit updates: one SSE event per bucket crossing
/// plus an unconditional best-effort DB flush. Failures are logged, never
/// propagated into the provider call that triggered the tracking.
#[derive(Clone, Default)]
pub struct RateLimitSink {
    pub broadcaster: Option<Arc<Broadcaster>>,
    pub pool: Option<SqlitePool>,
}

impl RateLimitSink {
    pub async fn publish(&self, provider_name: &str, status: &RateLimitStatus) {
        if status.crossed_bucket.is_some() {
            if let Some(broadcaster) = &self.broadcaster {
                broadcaster.send_event(
                    "rate_limit_update",
                    json!({
                        "provider_id": provider_name,
                        "rate_limit_used": status.used,
                        "rate_limit_max": status.max,
                        "reset_at": status.reset_at,
                    }),
                );
            }
        }

        if let Some(pool) = &self.pool {
            if let Err(e) = metrics_queries::flush_provider_rate_limit(
                pool,
                provider_name,
                status.used,
                status.max,
                status.reset_at.as_deref(),
            )
            .await
            {
                debug!("rate limit DB flush failed for {}: {}", provider_name, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_used_counts_requests_in_window() {
        let tracker = RateTracker::new("test", 100);
        let now = Utc::now();
        for i in 0..5 {
            tracker.track_at(now + Duration::milliseconds(i * 100));
        }
        let (used, max, reset_at) = tracker.status();
        assert_eq!(used, 5);
        assert_eq!(max, 100);
        // reset_at is the oldest request + 60s.
        let reset: DateTime<Utc> = reset_at.unwrap().parse().unwrap();
        assert_eq!(reset, now + Duration::seconds(60));
    }

    #[test]
    fn test_old_requests_expire() {
        let tracker = RateTracker::new("test", 100);
        let start = Utc::now() - Duration::seconds(120);
        tracker.track_at(start);
        let status = tracker.track_at(start + Duration::seconds(90));
        assert_eq!(status.used, 1);
    }

    #[test]
    fn test_bucket_crossing_fires_once() {
        // limit 10: 70% bucket begins at 7 requests.
        let tracker = RateTracker::new("test", 10);
        let now = Utc::now();

        let mut crossings = Vec::new();
        for i in 0..8 {
            let status = tracker.track_at(now + Duration::milliseconds(i));
            if let Some(bucket) = status.crossed_bucket {
                crossings.push((status.used, bucket));
            }
        }

        // Exactly one crossing event, at the 7th request, bucket 70.
        assert_eq!(crossings, vec![(7, 70)]);
    }

    #[test]
    fn test_all_buckets_cross_upward() {
        let tracker = RateTracker::new("test", 10);
        let now = Utc::now();
        let mut buckets = Vec::new();
        for i in 0..10 {
            if let Some(b) = tracker.track_at(now + Duration::milliseconds(i)).crossed_bucket {
                buckets.push(b);
            }
        }
        assert_eq!(buckets, vec![70, 90, 100]);
    }

    #[test]
    fn test_reset_crossing_announced() {
        let tracker = RateTracker::new("test", 10);
        let now = Utc::now();
        for i in 0..7 {
            tracker.track_at(now + Duration::milliseconds(i));
        }
        // Window rolls past all previous requests; this single request maps
        // back to bucket 0 and the reset is announced.
        let status = tracker.track_at(now + Duration::seconds(90));
        assert_eq!(status.used, 1);
        assert_eq!(status.crossed_bucket, Some(0));
    }

    #[test]
    fn test_unlimited_provider_stays_at_level_zero() {
        let tracker = RateTracker::new("test", -1);
        let now = Utc::now();
        for i in 0..50 {
            let status = tracker.track_at(now + Duration::milliseconds(i));
            assert_eq!(status.crossed_bucket, None);
        }
    }
}
