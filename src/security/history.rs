//! Running average value length per `(template, field)`.
//!
//! Feeds the `length_anomaly` signal: a value far longer than what a field
//! usually receives is a common sign of a pasted payload.

use std::collections::HashMap;
use std::sync::RwLock;

use super::detector::{RuleCategory, Signal};

/// Samples required before the average is trusted.
pub const LENGTH_HISTORY_MIN_SAMPLES: u64 = 5;

/// A value longer than this multiple of the average is anomalous.
pub const LENGTH_ANOMALY_FACTOR: f64 = 4.0;

/// Values at or below this many characters are never anomalous.
pub const LENGTH_ANOMALY_FLOOR: usize = 50;

/// Weight of the `length_anomaly` signal.
pub const LENGTH_ANOMALY_WEIGHT: f64 = 0.35;

/// Upper bound on tracked `(template, field)` pairs.
pub const LENGTH_HISTORY_MAX_KEYS: usize = 10_000;

#[derive(Debug, Clone, Copy, Default)]
struct RunningMean {
    samples: u64,
    mean: f64,
}

impl RunningMean {
    #[allow(clippy::cast_precision_loss)]
    fn push(&mut self, value: f64) {
        self.samples += 1;
        self.mean += (value - self.mean) / self.samples as f64;
    }
}

/// Thread-safe length history.
#[derive(Debug, Default)]
pub struct FieldLengthHistory {
    entries: RwLock<HashMap<(String, String), RunningMean>>,
}

impl FieldLengthHistory {
    /// Create an empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal for a value of `length` characters, if it is anomalous.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn check(&self, template: &str, field: &str, length: usize) -> Option<Signal> {
        if length <= LENGTH_ANOMALY_FLOOR {
            return None;
        }
        let stats = self.stats(template, field)?;
        if stats.samples < LENGTH_HISTORY_MIN_SAMPLES {
            return None;
        }
        (length as f64 > stats.mean * LENGTH_ANOMALY_FACTOR).then(|| {
            Signal::new(
                "length_anomaly",
                LENGTH_ANOMALY_WEIGHT,
                RuleCategory::Anomaly,
            )
        })
    }

    /// Record an accepted value length.
    #[allow(clippy::cast_precision_loss)]
    pub fn record(&self, template: &str, field: &str, length: usize) {
        let Ok(mut entries) = self.entries.write() else {
            tracing::error!("Failed to record field length: RwLock poisoned");
            return;
        };
        let key = (template.to_string(), field.to_string());
        if !entries.contains_key(&key) && entries.len() >= LENGTH_HISTORY_MAX_KEYS {
            tracing::debug!(template, field, "Length history full, not tracking new field");
            return;
        }
        entries.entry(key).or_default().push(length as f64);
    }

    /// `(samples, mean)` for a field.
    #[must_use]
    pub fn average(&self, template: &str, field: &str) -> Option<(u64, f64)> {
        self.stats(template, field).map(|s| (s.samples, s.mean))
    }

    /// Number of tracked `(template, field)` pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    /// Returns true if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn stats(&self, template: &str, field: &str) -> Option<RunningMean> {
        let entries = self.entries.read().ok()?;
        entries
            .get(&(template.to_string(), field.to_string()))
            .copied()
    }
}
