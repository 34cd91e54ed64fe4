//! Check metrics.
//!
//! Checks report timings and counts through a [`MetricsSink`]. A run without
//! metrics uses [`NoopMetrics`]; check semantics never depend on which sink
//! is attached. [`RecordingMetrics`] keeps everything in memory and renders
//! Prometheus text format.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Destination for check measurements.
pub trait MetricsSink: Send + Sync {
    /// Record one observation (seconds, bytes, counts).
    fn observe(&self, check: &str, metric: &str, labels: &[(&str, &str)], value: f64);

    /// Increment a counter.
    fn increment(&self, check: &str, metric: &str, labels: &[(&str, &str)]);

    /// Record the outcome of one check run.
    fn record_outcome(&self, check: &str, passed: bool);
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn observe(&self, _check: &str, _metric: &str, _labels: &[(&str, &str)], _value: f64) {}

    fn increment(&self, _check: &str, _metric: &str, _labels: &[(&str, &str)]) {}

    fn record_outcome(&self, _check: &str, _passed: bool) {}
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct Summary {
    count: u64,
    sum: f64,
}

type SeriesKey = (String, String);

/// In-memory sink rendering Prometheus text.
#[derive(Debug, Default)]
pub struct RecordingMetrics {
    summaries: Mutex<BTreeMap<SeriesKey, Summary>>,
    counters: Mutex<BTreeMap<SeriesKey, u64>>,
    /// Checks that passed
    pub checks_passed: AtomicU64,
    /// Checks that failed
    pub checks_failed: AtomicU64,
}

fn series_name(check: &str, metric: &str) -> String {
    let sanitize = |s: &str| -> String {
        s.chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect()
    };
    format!("swarm_keeper_{}_{}", sanitize(check), sanitize(metric))
}

fn render_labels(labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return String::new();
    }
    let pairs: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{k}=\"{}\"", v.replace('"', "\\\"")))
        .collect();
    format!("{{{}}}", pairs.join(","))
}

impl RecordingMetrics {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of observations recorded for a series.
    pub fn observation_count(&self, check: &str, metric: &str) -> u64 {
        let name = series_name(check, metric);
        self.summaries
            .lock()
            .unwrap()
            .iter()
            .filter(|((n, _), _)| *n == name)
            .map(|(_, s)| s.count)
            .sum()
    }

    /// Sum of observations recorded for a series.
    pub fn observation_sum(&self, check: &str, metric: &str) -> f64 {
        let name = series_name(check, metric);
        self.summaries
            .lock()
            .unwrap()
            .iter()
            .filter(|((n, _), _)| *n == name)
            .map(|(_, s)| s.sum)
            .sum()
    }

    /// Current value of a counter summed over labels.
    pub fn counter(&self, check: &str, metric: &str) -> u64 {
        let name = series_name(check, metric);
        self.counters
            .lock()
            .unwrap()
            .iter()
            .filter(|((n, _), _)| *n == name)
            .map(|(_, v)| *v)
            .sum()
    }

    /// Render all series in Prometheus text format.
    pub fn render(&self) -> String {
        let passed = self.checks_passed.load(Ordering::Relaxed);
        let failed = self.checks_failed.load(Ordering::Relaxed);
        let mut body = format!(
            r#"# HELP swarm_keeper_checks_passed_total Checks that passed
# TYPE swarm_keeper_checks_passed_total counter
swarm_keeper_checks_passed_total {passed}

# HELP swarm_keeper_checks_failed_total Checks that failed
# TYPE swarm_keeper_checks_failed_total counter
swarm_keeper_checks_failed_total {failed}
"#
        );

        let mut last = String::new();
        for ((name, labels), value) in self.counters.lock().unwrap().iter() {
            if *name != last {
                let _ = write!(body, "\n# TYPE {name}_total counter\n");
                last = name.clone();
            }
            let _ = writeln!(body, "{name}_total{labels} {value}");
        }

        last.clear();
        for ((name, labels), summary) in self.summaries.lock().unwrap().iter() {
            if *name != last {
                let _ = write!(body, "\n# TYPE {name} summary\n");
                last = name.clone();
            }
            let _ = writeln!(body, "{name}_sum{labels} {}", summary.sum);
            let _ = writeln!(body, "{name}_count{labels} {}", summary.count);
        }
        body
    }
}

impl MetricsSink for RecordingMetrics {
    fn observe(&self, check: &str, metric: &str, labels: &[(&str, &str)], value: f64) {
        let key = (series_name(check, metric), render_labels(labels));
        let mut summaries = self.summaries.lock().unwrap();
        let entry = summaries.entry(key).or_default();
        entry.count += 1;
        entry.sum += value;
    }

    fn increment(&self, check: &str, metric: &str, labels: &[(&str, &str)]) {
        let key = (series_name(check, metric), render_labels(labels));
        *self.counters.lock().unwrap().entry(key).or_default() += 1;
    }

    fn record_outcome(&self, _check: &str, passed: bool) {
        if passed {
            self.checks_passed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.checks_failed.fetch_add(1, Ordering::Relaxed);
        }
    }
}
