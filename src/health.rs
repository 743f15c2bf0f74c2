//! L10: rolling request-performance histogram and a health-check
//! aggregator over memory, error-rate, and latency thresholds.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

use crate::models::RequestPerf;

const MAX_HEAP_BYTES: u64 = 500 * 1024 * 1024;
const ERROR_RATE_THRESHOLD: f64 = 0.10;
const AVG_RESPONSE_TIME_THRESHOLD: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize)]
pub struct Metrics {
    pub total_requests: u64,
    pub error_count: u64,
    pub avg_duration_ms: f64,
    pub min_duration_ms: f64,
    pub max_duration_ms: f64,
    pub p95_duration_ms: f64,
    pub p99_duration_ms: f64,
}

impl Metrics {
    fn empty() -> Metrics {
        Metrics {
            total_requests: 0,
            error_count: 0,
            avg_duration_ms: 0.0,
            min_duration_ms: 0.0,
            max_duration_ms: 0.0,
            p95_duration_ms: 0.0,
            p99_duration_ms: 0.0,
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.error_count as f64 / self.total_requests as f64
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub component: String,
    pub status: CheckStatus,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: OverallStatus,
    pub checks: Vec<HealthCheck>,
    pub uptime: Duration,
}

/// Rolling histogram of the last `max_history_size` completed operations.
pub struct HealthMonitor {
    history: Mutex<VecDeque<RequestPerf>>,
    max_history_size: usize,
    started_at: std::time::Instant,
}

impl HealthMonitor {
    pub fn new(max_history_size: usize) -> Self {
        HealthMonitor {
            history: Mutex::new(VecDeque::with_capacity(max_history_size.min(1024))),
            max_history_size,
            started_at: std::time::Instant::now(),
        }
    }

    pub fn record(&self, perf: RequestPerf) {
        let mut history = self.history.lock().unwrap();
        if history.len() >= self.max_history_size {
            history.pop_front();
        }
        history.push_back(perf);
    }

    pub fn get_metrics(&self) -> Metrics {
        let history = self.history.lock().unwrap();
        compute_metrics(history.iter())
    }

    pub fn get_operation_metrics(&self, operation: &str) -> Metrics {
        let history = self.history.lock().unwrap();
        compute_metrics(history.iter().filter(|p| p.operation == operation))
    }

    /// Aggregate health across memory, error-rate, and latency thresholds
    /// (§4.9). `heap_bytes` is supplied by the caller since the engine, not
    /// this module, owns the process-wide allocator view.
    pub fn health_report(&self, heap_bytes: u64) -> HealthReport {
        let metrics = self.get_metrics();

        let memory_check = HealthCheck {
            component: "memory".to_string(),
            status: if heap_bytes < MAX_HEAP_BYTES {
                CheckStatus::Pass
            } else {
                CheckStatus::Fail
            },
            detail: format!("{} MB heap", heap_bytes / (1024 * 1024)),
        };

        let error_rate = metrics.error_rate();
        let error_check = HealthCheck {
            component: "error_rate".to_string(),
            status: if metrics.total_requests == 0 || error_rate < ERROR_RATE_THRESHOLD {
                CheckStatus::Pass
            } else {
                CheckStatus::Fail
            },
            detail: format!("{:.1}% over {} requests", error_rate * 100.0, metrics.total_requests),
        };

        let latency_check = HealthCheck {
            component: "avg_response_time".to_string(),
            status: if metrics.avg_duration_ms < AVG_RESPONSE_TIME_THRESHOLD.as_millis() as f64 {
                CheckStatus::Pass
            } else {
                CheckStatus::Fail
            },
            detail: format!("{:.1}ms average", metrics.avg_duration_ms),
        };

        let checks = vec![memory_check, error_check, latency_check];
        let pass_count = checks.iter().filter(|c| c.status == CheckStatus::Pass).count();
        let status = if pass_count == checks.len() {
            OverallStatus::Healthy
        } else if pass_count * 2 >= checks.len() {
            OverallStatus::Degraded
        } else {
            OverallStatus::Unhealthy
        };

        HealthReport {
            status,
            checks,
            uptime: self.started_at.elapsed(),
        }
    }
}

fn compute_metrics<'a, I: Iterator<Item = &'a RequestPerf>>(iter: I) -> Metrics {
    let mut durations_ms: Vec<f64> = Vec::new();
    let mut error_count = 0u64;
    let mut total_requests = 0u64;

    for perf in iter {
        total_requests += 1;
        if !perf.success {
            error_count += 1;
        }
        durations_ms.push(perf.duration.as_secs_f64() * 1000.0);
    }

    if durations_ms.is_empty() {
        return Metrics {
            total_requests,
            error_count,
            ..Metrics::empty()
        };
    }

    durations_ms.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let sum: f64 = durations_ms.iter().sum();
    let avg = sum / durations_ms.len() as f64;
    let min = durations_ms[0];
    let max = durations_ms[durations_ms.len() - 1];
    let p95 = percentile(&durations_ms, 0.95);
    let p99 = percentile(&durations_ms, 0.99);

    Metrics {
        total_requests,
        error_count,
        avg_duration_ms: avg,
        min_duration_ms: min,
        max_duration_ms: max,
        p95_duration_ms: p95,
        p99_duration_ms: p99,
    }
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (p * (sorted.len() as f64 - 1.0)).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}

/// Per-operation tag counters, exposed alongside [`HealthMonitor::get_metrics`]
/// when a caller wants a quick operation-name breakdown without filtering.
pub fn group_by_operation(perfs: &[RequestPerf]) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for perf in perfs {
        *counts.entry(perf.operation.clone()).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn perf(op: &str, ms: u64, success: bool) -> RequestPerf {
        RequestPerf {
            id: uuid::Uuid::new_v4(),
            operation: op.to_string(),
            started_at: chrono::Utc::now(),
            duration: Duration::from_millis(ms),
            success,
            error_message: None,
            tags: HashMap::new(),
        }
    }

    #[test]
    fn empty_monitor_reports_zero_metrics() {
        let monitor = HealthMonitor::new(100);
        let metrics = monitor.get_metrics();
        assert_eq!(metrics.total_requests, 0);
        assert_eq!(metrics.error_rate(), 0.0);
    }

    #[test]
    fn ring_buffer_caps_history() {
        let monitor = HealthMonitor::new(3);
        for i in 0..5 {
            monitor.record(perf("op", i, true));
        }
        assert_eq!(monitor.get_metrics().total_requests, 3);
    }

    #[test]
    fn metrics_compute_avg_and_error_rate() {
        let monitor = HealthMonitor::new(100);
        monitor.record(perf("op", 100, true));
        monitor.record(perf("op", 200, false));
        let metrics = monitor.get_metrics();
        assert_eq!(metrics.total_requests, 2);
        assert_eq!(metrics.error_count, 1);
        assert_eq!(metrics.error_rate(), 0.5);
        assert_eq!(metrics.avg_duration_ms, 150.0);
    }

    #[test]
    fn operation_metrics_filters_by_name() {
        let monitor = HealthMonitor::new(100);
        monitor.record(perf("fetch-timeline", 10, true));
        monitor.record(perf("search", 20, true));
        let metrics = monitor.get_operation_metrics("fetch-timeline");
        assert_eq!(metrics.total_requests, 1);
    }

    #[test]
    fn health_report_is_healthy_when_all_pass() {
        let monitor = HealthMonitor::new(100);
        monitor.record(perf("op", 10, true));
        let report = monitor.health_report(1024);
        assert_eq!(report.status, OverallStatus::Healthy);
    }

    #[test]
    fn health_report_degrades_on_high_error_rate() {
        let monitor = HealthMonitor::new(100);
        for _ in 0..10 {
            monitor.record(perf("op", 10, false));
        }
        let report = monitor.health_report(1024);
        assert_ne!(report.status, OverallStatus::Healthy);
    }

    #[test]
    fn health_report_fails_on_excessive_heap() {
        let monitor = HealthMonitor::new(100);
        monitor.record(perf("op", 10, true));
        let report = monitor.health_report(MAX_HEAP_BYTES * 2);
        assert_ne!(report.status, OverallStatus::Healthy);
    }
}
