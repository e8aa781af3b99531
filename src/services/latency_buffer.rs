use std::collections::HashMap;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;

/// In-memory API latency buffer.
///
/// Accumulates per-endpoint latency samples across requests with zero
/// per-request DB writes; the metrics snapshot job drains it into
/// `api_request_log` every few minutes.
#[derive(Default)]
pub struct LatencyBuffer {
    // (endpoint, method, status_class) -> day -> samples
    buffer: Mutex<HashMap<(String, String, String), HashMap<String, Vec<f64>>>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregatedRow {
    pub endpoint: String,
    pub method: String,
    pub status_class: String,
    pub call_count: i64,
    pub p95_ms: f64,
    pub avg_ms: f64,
    pub log_date: String,
}

impl LatencyBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, endpoint: &str, method: &str, status_code: u16, latency_ms: f64) {
        let day = Utc::now().format("%Y-%m-%d").to_string();
        let status_class = format!("{}xx", status_code / 100);
        let key = (
            endpoint.to_string(),
            method.to_uppercase(),
            status_class,
        );
        self.buffer
            .lock()
            .entry(key)
            .or_default()
            .entry(day)
            .or_default()
            .push(latency_ms);
    }

    /// Drain the buffer into aggregated rows ready for batch insert.
    pub fn flush(&self) -> Vec<AggregatedRow> {
        let snapshot = std::mem::take(&mut *self.buffer.lock());

        let mut rows = Vec::new();
        for ((endpoint, method, status_class), days) in snapshot {
            for (day, mut latencies) in days {
                if latencies.is_empty() {
                    continue;
                }
                latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                let n = latencies.len();
                let p95_idx = ((0.95 * n as f64).ceil() as usize).max(1) - 1;
                rows.push(AggregatedRow {
                    endpoint: endpoint.clone(),
                    method: method.clone(),
                    status_class: status_class.clone(),
                    call_count: n as i64,
                    p95_ms: (latencies[p95_idx] * 100.0).round() / 100.0,
                    avg_ms: ((latencies.iter().sum::<f64>() / n as f64) * 100.0).round() / 100.0,
                    log_date: day,
                });
            }
        }
        rows
    }
}
