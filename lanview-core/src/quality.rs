//! Network quality estimation from recent latency samples.
//!
//! Keeps a bounded FIFO of inter-frame latency observations and maps
//! their mean onto a small ordinal scale. The estimator is stateless
//! beyond the history itself, so classifying the same sample sequence
//! always yields the same label.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Number of samples kept per session.
pub const HISTORY_CAPACITY: usize = 30;

// ── NetworkQuality ───────────────────────────────────────────────

/// Ordinal network-quality label.
///
/// `Unknown` means "not enough data yet" and must never be read as
/// the worst case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkQuality {
    Excellent,
    Good,
    Fair,
    Poor,
    Unknown,
}

impl fmt::Display for NetworkQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NetworkQuality::Excellent => "excellent",
            NetworkQuality::Good => "good",
            NetworkQuality::Fair => "fair",
            NetworkQuality::Poor => "poor",
            NetworkQuality::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

// ── QualityThresholds ────────────────────────────────────────────

/// Latency cutoffs in milliseconds.
///
/// A mean below `good` is excellent, below `fair` good, below `poor`
/// fair, anything else poor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityThresholds {
    pub good: f64,
    pub fair: f64,
    pub poor: f64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            good: 50.0,
            fair: 150.0,
            poor: 300.0,
        }
    }
}

impl QualityThresholds {
    pub fn label_for(&self, mean_ms: f64) -> NetworkQuality {
        if mean_ms < self.good {
            NetworkQuality::Excellent
        } else if mean_ms < self.fair {
            NetworkQuality::Good
        } else if mean_ms < self.poor {
            NetworkQuality::Fair
        } else {
            NetworkQuality::Poor
        }
    }
}

// ── NetworkQualityEstimator ──────────────────────────────────────

/// Bounded latency history plus classification.
#[derive(Debug, Clone)]
pub struct NetworkQualityEstimator {
    /// Samples in milliseconds, oldest first.
    samples: VecDeque<f64>,
    thresholds: QualityThresholds,
    enabled: bool,
}

impl NetworkQualityEstimator {
    pub fn new(thresholds: QualityThresholds) -> Self {
        Self {
            samples: VecDeque::with_capacity(HISTORY_CAPACITY),
            thresholds,
            enabled: true,
        }
    }

    /// An estimator that keeps recording but always reports `Unknown`.
    pub fn disabled(thresholds: QualityThresholds) -> Self {
        Self {
            enabled: false,
            ..Self::new(thresholds)
        }
    }

    /// Append a sample, evicting the oldest past capacity.
    pub fn record_sample(&mut self, latency: Duration) {
        self.record_ms(latency.as_secs_f64() * 1000.0);
    }

    pub fn record_ms(&mut self, latency_ms: f64) {
        if self.samples.len() == HISTORY_CAPACITY {
            self.samples.pop_front();
        }
        self.samples.push_back(latency_ms);
    }

    /// Mean latency in milliseconds, or `None` with no samples.
    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    /// Mean latency for reporting; `0.0` before the first sample.
    pub fn average_ms(&self) -> f64 {
        self.mean().unwrap_or(0.0)
    }

    pub fn classify(&self) -> NetworkQuality {
        if !self.enabled {
            return NetworkQuality::Unknown;
        }
        match self.mean() {
            Some(mean) => self.thresholds.label_for(mean),
            None => NetworkQuality::Unknown,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Samples, oldest first.
    pub fn samples(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().copied()
    }
}

impl Default for NetworkQualityEstimator {
    fn default() -> Self {
        Self::new(QualityThresholds::default())
    }
}

// ── Tests ────────────────────────────────────────────────────────
