//! Metrics collection.
//!
//! This module provides:
//! - The [`MetricsSink`] seam the pipeline and manager record into
//! - An in-process [`InMemoryMetrics`] collector with a Prometheus text renderer
//! - A [`NoopMetrics`] sink for callers that do not collect
//! - A [`Timer`] for latency measurements
//!
//! # Example
//!
//! ```
//! use prompt_assembler::metrics::{InMemoryMetrics, MetricsSink, OPERATIONS_TOTAL};
//!
//! let metrics = InMemoryMetrics::new();
//! metrics.increment_counter(OPERATIONS_TOTAL, &[("operation", "fill_template"), ("status", "success")]);
//! metrics.increment_counter(OPERATIONS_TOTAL, &[("status", "success"), ("operation", "fill_template")]);
//!
//! // Label order does not matter
//! assert_eq!(
//!     metrics.counter(OPERATIONS_TOTAL, &[("operation", "fill_template"), ("status", "success")]),
//!     2
//! );
//! assert!(metrics.render_prometheus().contains("operations_total{operation=\"fill_template\",status=\"success\"} 2"));
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::RwLock;
use std::time::Instant;

/// Completed façade operations, labelled `operation` and `status`.
pub const OPERATIONS_TOTAL: &str = "operations_total";
/// Façade operation latency in seconds, labelled `operation`.
pub const OPERATION_DURATION_SECONDS: &str = "operation_duration_seconds";
/// Security pipeline runs, labelled `status` (`passed`, `invalid`, `blocked`, `disabled`).
pub const SECURITY_VALIDATION_TOTAL: &str = "security_validation_total";
/// Whole security pipeline latency in seconds.
pub const SECURITY_VALIDATION_DURATION_SECONDS: &str = "security_validation_duration_seconds";
/// Per-stage pipeline latency in seconds, labelled `stage`.
pub const SECURITY_STAGE_DURATION_SECONDS: &str = "security_stage_duration_seconds";
/// Fields scored at or above the block threshold, labelled `mode` (`strict`, `permissive`).
pub const SECURITY_INJECTION_DETECTED_TOTAL: &str = "security_injection_detected_total";
/// Distribution of per-field risk scores.
pub const SECURITY_RISK_SCORE: &str = "security_risk_score";
/// Cache lookups that returned a value.
pub const CACHE_HITS_TOTAL: &str = "cache_hits_total";
/// Cache lookups that found nothing (or only an expired entry).
pub const CACHE_MISSES_TOTAL: &str = "cache_misses_total";

/// Receiver of counter and histogram observations.
///
/// Labels are `(name, value)` pairs; their order is not significant.
pub trait MetricsSink: Send + Sync + std::fmt::Debug {
    /// Add one to a counter.
    fn increment_counter(&self, name: &str, labels: &[(&str, &str)]);

    /// Record one histogram observation.
    fn observe_histogram(&self, name: &str, labels: &[(&str, &str)], value: f64);
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn increment_counter(&self, _name: &str, _labels: &[(&str, &str)]) {}

    fn observe_histogram(&self, _name: &str, _labels: &[(&str, &str)], _value: f64) {}
}

/// Metric name plus its sorted labels.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SeriesKey {
    /// Metric name.
    pub name: String,
    /// Labels sorted by name.
    pub labels: Vec<(String, String)>,
}

impl SeriesKey {
    /// Build a key, normalising label order.
    #[must_use]
    pub fn new(name: &str, labels: &[(&str, &str)]) -> Self {
        let mut labels: Vec<(String, String)> = labels
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        labels.sort();
        Self {
            name: name.to_string(),
            labels,
        }
    }

    fn render_labels(&self) -> String {
        if self.labels.is_empty() {
            return String::new();
        }
        let inner: Vec<String> = self
            .labels
            .iter()
            .map(|(k, v)| format!("{k}=\"{}\"", escape_label_value(v)))
            .collect();
        format!("{{{}}}", inner.join(","))
    }
}

/// Aggregate of one histogram series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistogramSummary {
    /// Number of observations.
    pub count: u64,
    /// Sum of observations.
    pub sum: f64,
    /// Smallest observation.
    pub min: f64,
    /// Largest observation.
    pub max: f64,
}

impl HistogramSummary {
    const fn first(value: f64) -> Self {
        Self {
            count: 1,
            sum: value,
            min: value,
            max: value,
        }
    }

    fn observe(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    /// Mean observation, or 0 with no observations.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

/// Point-in-time copy of every series.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Counter values.
    pub counters: Vec<(SeriesKey, u64)>,
    /// Histogram aggregates.
    pub histograms: Vec<(SeriesKey, HistogramSummary)>,
}

/// Thread-safe in-process metrics collector.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    counters: RwLock<BTreeMap<SeriesKey, u64>>,
    histograms: RwLock<BTreeMap<SeriesKey, HistogramSummary>>,
}

impl InMemoryMetrics {
    /// Create a new collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a counter (0 if never incremented).
    #[must_use]
    pub fn counter(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let key = SeriesKey::new(name, labels);
        self.counters
            .read()
            .map(|counters| counters.get(&key).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Sum of a counter across every label combination.
    #[must_use]
    pub fn counter_total(&self, name: &str) -> u64 {
        self.counters
            .read()
            .map(|counters| {
                counters
                    .iter()
                    .filter(|(key, _)| key.name == name)
                    .map(|(_, v)| *v)
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Aggregate of a histogram series.
    #[must_use]
    pub fn histogram(&self, name: &str, labels: &[(&str, &str)]) -> Option<HistogramSummary> {
        let key = SeriesKey::new(name, labels);
        self.histograms
            .read()
            .ok()
            .and_then(|histograms| histograms.get(&key).copied())
    }

    /// Copy every series.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters = match self.counters.read() {
            Ok(c) => c.clone(),
            Err(poison_error) => {
                tracing::warn!(
                    error = %poison_error,
                    "Reading counters from poisoned lock, using recovered data"
                );
                poison_error.into_inner().clone()
            }
        };
        let histograms = match self.histograms.read() {
            Ok(h) => h.clone(),
            Err(poison_error) => {
                tracing::warn!(
                    error = %poison_error,
                    "Reading histograms from poisoned lock, using recovered data"
                );
                poison_error.into_inner().clone()
            }
        };

        MetricsSnapshot {
            counters: counters.into_iter().collect(),
            histograms: histograms.into_iter().collect(),
        }
    }

    /// Render every series in the Prometheus text exposition format.
    ///
    /// Histograms are exposed as summaries (`_count` and `_sum`).
    #[must_use]
    pub fn render_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let mut out = String::new();

        let mut last_name: Option<&str> = None;
        for (key, value) in &snapshot.counters {
            if last_name != Some(key.name.as_str()) {
                let _ = writeln!(out, "# TYPE {} counter", key.name);
                last_name = Some(key.name.as_str());
            }
            let _ = writeln!(out, "{}{} {value}", key.name, key.render_labels());
        }

        last_name = None;
        for (key, summary) in &snapshot.histograms {
            if last_name != Some(key.name.as_str()) {
                let _ = writeln!(out, "# TYPE {} summary", key.name);
                last_name = Some(key.name.as_str());
            }
            let labels = key.render_labels();
            let _ = writeln!(out, "{}_count{labels} {}", key.name, summary.count);
            let _ = writeln!(out, "{}_sum{labels} {}", key.name, summary.sum);
        }

        out
    }

    /// Clear all metrics (useful for testing).
    pub fn clear(&self) {
        if let Ok(mut counters) = self.counters.write() {
            counters.clear();
        }
        if let Ok(mut histograms) = self.histograms.write() {
            histograms.clear();
        }
    }
}

impl MetricsSink for InMemoryMetrics {
    fn increment_counter(&self, name: &str, labels: &[(&str, &str)]) {
        match self.counters.write() {
            Ok(mut counters) => {
                *counters.entry(SeriesKey::new(name, labels)).or_insert(0) += 1;
            }
            Err(poison_error) => {
                tracing::error!(
                    metric = %name,
                    error = %poison_error,
                    "Failed to increment counter: RwLock poisoned"
                );
            }
        }
    }

    fn observe_histogram(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        if !value.is_finite() {
            tracing::warn!(metric = %name, "Dropping non-finite histogram observation");
            return;
        }
        match self.histograms.write() {
            Ok(mut histograms) => {
                histograms
                    .entry(SeriesKey::new(name, labels))
                    .and_modify(|h| h.observe(value))
                    .or_insert_with(|| HistogramSummary::first(value));
            }
            Err(poison_error) => {
                tracing::error!(
                    metric = %name,
                    error = %poison_error,
                    "Failed to record histogram: RwLock poisoned"
                );
            }
        }
    }
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

/// Timer for measuring operation latency.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    #[must_use]
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed time in seconds.
    #[must_use]
    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::start()
    }
}
