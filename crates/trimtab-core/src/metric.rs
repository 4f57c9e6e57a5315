// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Core types for resource usage measurement and bottleneck detection.

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::time::Instant;

/// The categories of resource pressure the governance core tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricKind {
    /// CPU utilization, in percent (0–100).
    Cpu,
    /// Memory utilization, in percent (0–100).
    Memory,
    /// Request latency, in milliseconds.
    Latency,
    /// Failed-request fraction (0.0–1.0).
    ErrorRate,
}

impl MetricKind {
    /// Every metric kind, in a fixed order.
    pub const ALL: [MetricKind; 4] = [
        MetricKind::Cpu,
        MetricKind::Memory,
        MetricKind::Latency,
        MetricKind::ErrorRate,
    ];

    /// Returns the stable snake_case name used in log output.
    pub fn name(&self) -> &'static str {
        match self {
            MetricKind::Cpu => "cpu",
            MetricKind::Memory => "memory",
            MetricKind::Latency => "latency",
            MetricKind::ErrorRate => "error_rate",
        }
    }
}

impl Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A single observation of one metric at one point in time.
///
/// Samples are immutable once recorded. They are appended to a rolling
/// window and purged once they fall outside the retention period.
#[derive(Debug, Clone)]
pub struct UsageSample {
    /// The metric this sample belongs to.
    pub kind: MetricKind,
    /// The observed value, in the unit of [`MetricKind`].
    pub value: f64,
    /// When the sample was taken.
    pub recorded_at: Instant,
    /// Optional dimensional labels, sorted by key.
    pub labels: Vec<(String, String)>,
}

impl UsageSample {
    /// Creates a sample recorded now, without labels.
    pub fn new(kind: MetricKind, value: f64) -> Self {
        Self {
            kind,
            value,
            recorded_at: Instant::now(),
            labels: Vec::new(),
        }
    }

    /// Adds a dimensional label, returning the sample.
    /// Labels are kept sorted by key for consistent display.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push((key.into(), value.into()));
        self.labels.sort_by(|a, b| a.0.cmp(&b.0));
        self
    }
}

/// How far past its threshold a metric has moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    /// The warning level was crossed; corrective pressure is advisable.
    Warning,
    /// The critical level was crossed; corrective pressure is mandatory.
    Critical,
}

impl Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// A transient notification that a sampled metric crossed its threshold.
///
/// Events are dispatched to subscribers the instant the crossing is
/// observed; they are never stored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BottleneckEvent {
    /// The metric that crossed its threshold.
    pub kind: MetricKind,
    /// Whether the warning or the critical level was crossed.
    pub severity: Severity,
    /// The sampled value that triggered the event.
    pub value: f64,
    /// The threshold that was crossed.
    pub threshold: f64,
}

/// Warning and critical levels for a single metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdLevels {
    /// Values at or above this level raise a [`Severity::Warning`] event.
    pub warning: f64,
    /// Values at or above this level raise a [`Severity::Critical`] event.
    pub critical: f64,
}

impl ThresholdLevels {
    /// Creates a pair of levels. `warning` should not exceed `critical`.
    pub fn new(warning: f64, critical: f64) -> Self {
        Self { warning, critical }
    }
}

/// Per-metric warning/critical thresholds for bottleneck detection.
///
/// Supplied at construction and replaceable as a whole through explicit
/// update calls on the owning component.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// CPU utilization thresholds, in percent.
    pub cpu: ThresholdLevels,
    /// Memory utilization thresholds, in percent.
    pub memory: ThresholdLevels,
    /// Latency thresholds, in milliseconds.
    pub latency: ThresholdLevels,
    /// Error-rate thresholds, as fractions.
    pub error_rate: ThresholdLevels,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            cpu: ThresholdLevels::new(70.0, 90.0),
            memory: ThresholdLevels::new(75.0, 90.0),
            latency: ThresholdLevels::new(500.0, 2000.0),
            error_rate: ThresholdLevels::new(0.05, 0.10),
        }
    }
}

impl ThresholdConfig {
    /// Returns the levels configured for `kind`.
    pub fn levels(&self, kind: MetricKind) -> ThresholdLevels {
        match kind {
            MetricKind::Cpu => self.cpu,
            MetricKind::Memory => self.memory,
            MetricKind::Latency => self.latency,
            MetricKind::ErrorRate => self.error_rate,
        }
    }

    /// Classifies `value` against the levels for `kind`.
    ///
    /// Returns `None` while the value is below the warning level.
    pub fn severity_of(&self, kind: MetricKind, value: f64) -> Option<Severity> {
        let levels = self.levels(kind);
        if value >= levels.critical {
            Some(Severity::Critical)
        } else if value >= levels.warning {
            Some(Severity::Warning)
        } else {
            None
        }
    }

    /// Returns the threshold that `value` crossed for `kind`, if any.
    pub fn crossed_threshold(&self, kind: MetricKind, value: f64) -> Option<f64> {
        let levels = self.levels(kind);
        match self.severity_of(kind, value)? {
            Severity::Critical => Some(levels.critical),
            Severity::Warning => Some(levels.warning),
        }
    }
}
