use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

const EVALUATION_BUCKETS_SECONDS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Lock-free histogram with fixed buckets.
///
/// Storage is non-cumulative (one bucket per observation); rendering
/// accumulates.
struct Histogram {
    upper_bounds_nanos: Vec<u64>,
    bucket_counts: Vec<AtomicU64>,
    sum_nanos: AtomicU64,
}

impl Histogram {
    fn from_seconds_bounds(bounds: &[f64]) -> Self {
        let upper_bounds_nanos: Vec<u64> = bounds
            .iter()
            .map(|sec| (*sec * 1_000_000_000.0) as u64)
            .collect();
        let bucket_counts = (0..=upper_bounds_nanos.len())
            .map(|_| AtomicU64::new(0))
            .collect();
        Self {
            upper_bounds_nanos,
            bucket_counts,
            sum_nanos: AtomicU64::new(0),
        }
    }

    fn observe(&self, elapsed: Duration) {
        let nanos = elapsed.as_nanos().min(u64::MAX as u128) as u64;
        self.sum_nanos.fetch_add(nanos, Ordering::Relaxed);
        let idx = self
            .upper_bounds_nanos
            .iter()
            .position(|bound| nanos <= *bound)
            .unwrap_or(self.upper_bounds_nanos.len());
        self.bucket_counts[idx].fetch_add(1, Ordering::Relaxed);
    }

    fn render(&self, out: &mut String, name: &str, help: &str) {
        let _ = writeln!(out, "# HELP {name} {help}");
        let _ = writeln!(out, "# TYPE {name} histogram");
        let mut cumulative = 0u64;
        for (idx, count) in self.bucket_counts.iter().enumerate() {
            cumulative += count.load(Ordering::Relaxed);
            match self.upper_bounds_nanos.get(idx) {
                Some(bound) => {
                    let le = *bound as f64 / 1_000_000_000.0;
                    let _ = writeln!(out, "{name}_bucket{{le=\"{le}\"}} {cumulative}");
                }
                None => {
                    let _ = writeln!(out, "{name}_bucket{{le=\"+Inf\"}} {cumulative}");
                }
            }
        }
        let sum = self.sum_nanos.load(Ordering::Relaxed) as f64 / 1_000_000_000.0;
        let _ = writeln!(out, "{name}_sum {sum}");
        let _ = writeln!(out, "{name}_count {cumulative}");
    }
}

/// How an evaluation task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EvalStatus {
    Ok,
    Failed,
    TimedOut,
    Cancelled,
}

/// Shared counters for one or more queue-mode pipelines.
///
/// All updates are relaxed atomics; read a consistent-enough view with
/// [`snapshot`](Self::snapshot).
pub struct PipelineMetrics {
    items_received_total: AtomicU64,
    items_rejected_total: AtomicU64,

    evaluations_started_total: AtomicU64,
    evaluations_failed_total: AtomicU64,
    evaluations_timed_out_total: AtomicU64,
    evaluations_cancelled_total: AtomicU64,
    evaluations_in_flight: AtomicU64,

    results_accepted_total: AtomicU64,
    empty_filtered_total: AtomicU64,
    results_delivered_total: AtomicU64,
    /// Last length written by any pipeline sharing this instance.
    backlog_len: AtomicU64,
    backlog_peak: AtomicU64,

    evaluation_seconds: Histogram,
}

/// Point-in-time copy of [`PipelineMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub items_received: u64,
    pub items_rejected: u64,
    pub evaluations_started: u64,
    pub evaluations_failed: u64,
    pub evaluations_timed_out: u64,
    pub evaluations_cancelled: u64,
    pub evaluations_in_flight: u64,
    pub results_accepted: u64,
    pub empty_filtered: u64,
    pub results_delivered: u64,
    pub backlog_len: u64,
    pub backlog_peak: u64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            items_received_total: AtomicU64::new(0),
            items_rejected_total: AtomicU64::new(0),
            evaluations_started_total: AtomicU64::new(0),
            evaluations_failed_total: AtomicU64::new(0),
            evaluations_timed_out_total: AtomicU64::new(0),
            evaluations_cancelled_total: AtomicU64::new(0),
            evaluations_in_flight: AtomicU64::new(0),
            results_accepted_total: AtomicU64::new(0),
            empty_filtered_total: AtomicU64::new(0),
            results_delivered_total: AtomicU64::new(0),
            backlog_len: AtomicU64::new(0),
            backlog_peak: AtomicU64::new(0),
            evaluation_seconds: Histogram::from_seconds_bounds(EVALUATION_BUCKETS_SECONDS),
        }
    }

    pub(crate) fn inc_item_received(&self) {
        self.items_received_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_item_rejected(&self) {
        self.items_rejected_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn evaluation_started(&self) {
        self.evaluations_started_total
            .fetch_add(1, Ordering::Relaxed);
        self.evaluations_in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn evaluation_finished(&self, status: EvalStatus, elapsed: Duration) {
        self.evaluations_in_flight.fetch_sub(1, Ordering::Relaxed);
        self.evaluation_seconds.observe(elapsed);
        let counter = match status {
            EvalStatus::Ok => return,
            EvalStatus::Failed => &self.evaluations_failed_total,
            EvalStatus::TimedOut => &self.evaluations_timed_out_total,
            EvalStatus::Cancelled => &self.evaluations_cancelled_total,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_result_accepted(&self) {
        self.results_accepted_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_empty_filtered(&self) {
        self.empty_filtered_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_result_delivered(&self) {
        self.results_delivered_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_backlog(&self, len: usize) {
        let len = len as u64;
        self.backlog_len.store(len, Ordering::Relaxed);
        self.backlog_peak.fetch_max(len, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |v: &AtomicU64| v.load(Ordering::Relaxed);
        MetricsSnapshot {
            items_received: load(&self.items_received_total),
            items_rejected: load(&self.items_rejected_total),
            evaluations_started: load(&self.evaluations_started_total),
            evaluations_failed: load(&self.evaluations_failed_total),
            evaluations_timed_out: load(&self.evaluations_timed_out_total),
            evaluations_cancelled: load(&self.evaluations_cancelled_total),
            evaluations_in_flight: load(&self.evaluations_in_flight),
            results_accepted: load(&self.results_accepted_total),
            empty_filtered: load(&self.empty_filtered_total),
            results_delivered: load(&self.results_delivered_total),
            backlog_len: load(&self.backlog_len),
            backlog_peak: load(&self.backlog_peak),
        }
    }

    /// Prometheus text exposition of every metric.
    pub fn render_prometheus(&self) -> String {
        let s = self.snapshot();
        let mut out = String::new();
        let counters = [
            ("rq_items_received_total", "Work items read from the input endpoint.", s.items_received),
            ("rq_items_rejected_total", "Work items dropped by the reject admission policy.", s.items_rejected),
            ("rq_evaluations_started_total", "Evaluation tasks spawned.", s.evaluations_started),
            ("rq_evaluations_failed_total", "Evaluations that returned an error.", s.evaluations_failed),
            ("rq_evaluations_timed_out_total", "Evaluations cut off by eval_timeout.", s.evaluations_timed_out),
            ("rq_evaluations_cancelled_total", "Evaluations cancelled by shutdown.", s.evaluations_cancelled),
            ("rq_results_accepted_total", "Result values pulled into the backlog.", s.results_accepted),
            ("rq_empty_filtered_total", "Empty outcomes discarded by the multiplexer.", s.empty_filtered),
            ("rq_results_delivered_total", "Result values handed to the output endpoint.", s.results_delivered),
        ];
        for (name, help, value) in counters {
            render_metric(&mut out, name, help, "counter", value);
        }
        let gauges = [
            ("rq_evaluations_in_flight", "Evaluation tasks currently running.", s.evaluations_in_flight),
            ("rq_backlog_len", "Result values buffered awaiting delivery.", s.backlog_len),
            ("rq_backlog_peak", "Largest backlog length observed.", s.backlog_peak),
        ];
        for (name, help, value) in gauges {
            render_metric(&mut out, name, help, "gauge", value);
        }
        self.evaluation_seconds.render(
            &mut out,
            "rq_evaluation_seconds",
            "Wall time of individual evaluations.",
        );
        out
    }

    pub fn summary_line(&self) -> String {
        let s = self.snapshot();
        format!(
            "received={} rejected={} evaluated={} failed={} in_flight={} delivered={} empty={} backlog={} backlog_peak={}",
            s.items_received,
            s.items_rejected,
            s.evaluations_started,
            s.evaluations_failed + s.evaluations_timed_out,
            s.evaluations_in_flight,
            s.results_delivered,
            s.empty_filtered,
            s.backlog_len,
            s.backlog_peak,
        )
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn render_metric(out: &mut String, name: &str, help: &str, kind: &str, value: u64) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} {kind}");
    let _ = writeln!(out, "{name} {value}");
}

/// Log a metrics snapshot every `interval` until cancelled.
pub(crate) async fn run_metrics_reporter(
    metrics: Arc<PipelineMetrics>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut tick = tokio::time::interval(interval);
    // The first tick completes immediately; skip it so the first snapshot has
    // something in it.
    tick.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                rq_info!(res, summary = %metrics.summary_line(), "pipeline metrics snapshot");
            }
        }
    }
    rq_info!(res, summary = %metrics.summary_line(), "final pipeline metrics");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_occurrences(haystack: &str, needle: &str) -> usize {
        haystack.match_indices(needle).count()
    }

    #[test]
    fn renders_type_line_once_per_metric() {
        let metrics = PipelineMetrics::new();
        let text = metrics.render_prometheus();
        assert_eq!(
            count_occurrences(&text, "# TYPE rq_results_delivered_total counter"),
            1
        );
        assert_eq!(count_occurrences(&text, "# TYPE rq_backlog_len gauge"), 1);
        assert_eq!(
            count_occurrences(&text, "# TYPE rq_evaluation_seconds histogram"),
            1
        );
    }

    #[test]
    fn histogram_count_matches_inf_bucket() {
        let metrics = PipelineMetrics::new();
        metrics.evaluation_started();
        metrics.evaluation_started();
        metrics.evaluation_finished(EvalStatus::Ok, Duration::from_millis(3));
        metrics.evaluation_finished(EvalStatus::Failed, Duration::from_secs(60));
        let text = metrics.render_prometheus();
        assert!(text.contains("rq_evaluation_seconds_bucket{le=\"+Inf\"} 2"));
        assert!(text.contains("rq_evaluation_seconds_count 2"));
        assert!(text.contains("rq_evaluation_seconds_bucket{le=\"0.005\"} 1"));
    }

    #[test]
    fn evaluation_status_counters_and_in_flight() {
        let metrics = PipelineMetrics::new();
        for _ in 0..4 {
            metrics.evaluation_started();
        }
        metrics.evaluation_finished(EvalStatus::Failed, Duration::ZERO);
        metrics.evaluation_finished(EvalStatus::TimedOut, Duration::ZERO);
        metrics.evaluation_finished(EvalStatus::Cancelled, Duration::ZERO);

        let s = metrics.snapshot();
        assert_eq!(s.evaluations_started, 4);
        assert_eq!(s.evaluations_in_flight, 1);
        assert_eq!(s.evaluations_failed, 1);
        assert_eq!(s.evaluations_timed_out, 1);
        assert_eq!(s.evaluations_cancelled, 1);
    }

    #[test]
    fn backlog_peak_is_sticky() {
        let metrics = PipelineMetrics::new();
        metrics.set_backlog(5);
        metrics.set_backlog(12);
        metrics.set_backlog(0);
        let s = metrics.snapshot();
        assert_eq!(s.backlog_len, 0);
        assert_eq!(s.backlog_peak, 12);
        assert!(metrics.summary_line().contains("backlog_peak=12"));
    }
}
