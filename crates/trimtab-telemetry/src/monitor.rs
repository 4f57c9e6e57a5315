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

//! Periodic usage sampling and bottleneck detection.

use crate::window::SampleWindow;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use trimtab_core::metric::{BottleneckEvent, MetricKind, ThresholdConfig, UsageSample};
use trimtab_core::schedule::{Scheduler, TaskHandle};
use trimtab_core::source::MetricsSource;

/// How far back [`UsageMonitor::averages`] looks by default.
const SNAPSHOT_WINDOW: Duration = Duration::from_secs(60);

/// How often each metric is sampled. Metrics may use distinct intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleIntervals {
    /// CPU sampling interval.
    pub cpu: Duration,
    /// Memory sampling interval.
    pub memory: Duration,
    /// Latency sampling interval.
    pub latency: Duration,
    /// Error-rate sampling interval.
    pub error_rate: Duration,
}

impl Default for SampleIntervals {
    fn default() -> Self {
        let every = Duration::from_secs(5);
        Self {
            cpu: every,
            memory: every,
            latency: every,
            error_rate: every,
        }
    }
}

impl SampleIntervals {
    /// Returns the interval configured for `kind`.
    pub fn for_kind(&self, kind: MetricKind) -> Duration {
        match kind {
            MetricKind::Cpu => self.cpu,
            MetricKind::Memory => self.memory,
            MetricKind::Latency => self.latency,
            MetricKind::ErrorRate => self.error_rate,
        }
    }
}

/// Configuration for the [`UsageMonitor`].
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Warning/critical levels per metric.
    pub thresholds: ThresholdConfig,
    /// Per-metric sampling intervals.
    pub intervals: SampleIntervals,
    /// How long samples are retained for moving-average queries.
    pub retention: Duration,
    /// Capacity of each subscriber's event channel. When a subscriber
    /// falls behind, further events for it are dropped, not buffered.
    pub event_buffer: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            thresholds: ThresholdConfig::default(),
            intervals: SampleIntervals::default(),
            retention: Duration::from_secs(3600),
            event_buffer: 64,
        }
    }
}

/// Moving averages for every metric over the snapshot window.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceAverages {
    /// Average CPU utilization, percent.
    pub cpu: Option<f64>,
    /// Average memory utilization, percent.
    pub memory: Option<f64>,
    /// Average latency, milliseconds.
    pub latency: Option<f64>,
    /// Average error rate, fraction.
    pub error_rate: Option<f64>,
}

impl ResourceAverages {
    /// Returns the average for `kind`.
    pub fn for_kind(&self, kind: MetricKind) -> Option<f64> {
        match kind {
            MetricKind::Cpu => self.cpu,
            MetricKind::Memory => self.memory,
            MetricKind::Latency => self.latency,
            MetricKind::ErrorRate => self.error_rate,
        }
    }
}

/// Samples system metrics on independent timers and raises
/// [`BottleneckEvent`]s the instant a sampled value crosses its threshold.
///
/// Samples accumulate in a rolling window (default retention one hour) for
/// moving-average queries. A sampler that fails is logged and skipped for
/// that cycle; monitoring continues.
pub struct UsageMonitor {
    config: MonitorConfig,
    source: Arc<dyn MetricsSource>,
    scheduler: Arc<dyn Scheduler>,
    thresholds: Arc<RwLock<ThresholdConfig>>,
    window: Arc<RwLock<SampleWindow>>,
    subscribers: Arc<Mutex<Vec<Sender<BottleneckEvent>>>>,
    handles: Mutex<Vec<TaskHandle>>,
}

impl UsageMonitor {
    /// Creates a monitor. Call [`start`](Self::start) to begin sampling.
    pub fn new(
        config: MonitorConfig,
        source: Arc<dyn MetricsSource>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        let window = Arc::new(RwLock::new(SampleWindow::new(config.retention)));
        let thresholds = Arc::new(RwLock::new(config.thresholds));
        Self {
            config,
            source,
            scheduler,
            thresholds,
            window,
            subscribers: Arc::new(Mutex::new(Vec::new())),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Replaces the detection thresholds; subsequent samples are
    /// classified against the new levels.
    pub fn update_thresholds(&self, thresholds: ThresholdConfig) {
        *self.thresholds.write().unwrap() = thresholds;
        log::info!("Monitor thresholds updated");
    }

    /// Starts one repeating sampling task per metric kind. Idempotent.
    pub fn start(&self) {
        let mut handles = self.handles.lock().unwrap();
        if !handles.is_empty() {
            return;
        }

        for kind in MetricKind::ALL {
            let source = Arc::clone(&self.source);
            let window = Arc::clone(&self.window);
            let subscribers = Arc::clone(&self.subscribers);
            let shared_thresholds = Arc::clone(&self.thresholds);

            let handle = self.scheduler.repeat(
                self.config.intervals.for_kind(kind),
                Box::new(move || match source.sample(kind) {
                    Ok(value) => {
                        window.write().unwrap().push(UsageSample::new(kind, value));
                        let thresholds = *shared_thresholds.read().unwrap();
                        if let Some(severity) = thresholds.severity_of(kind, value) {
                            let event = BottleneckEvent {
                                kind,
                                severity,
                                value,
                                threshold: thresholds
                                    .crossed_threshold(kind, value)
                                    .unwrap_or(value),
                            };
                            log::warn!(
                                "Bottleneck detected: {} = {:.2} crossed {} threshold {:.2}",
                                kind,
                                value,
                                severity,
                                event.threshold
                            );
                            dispatch(&subscribers, event);
                        }
                    }
                    Err(err) => {
                        log::warn!("Sampler for {} failed, skipping cycle: {:#}", kind, err);
                    }
                }),
            );
            handles.push(handle);
        }
        log::info!("Usage monitor started ({} sampling tasks)", handles.len());
    }

    /// Cancels all sampling timers and discards subscribers. Idempotent.
    pub fn stop(&self) {
        let mut handles = self.handles.lock().unwrap();
        for handle in handles.drain(..) {
            handle.cancel();
        }
        self.subscribers.lock().unwrap().clear();
        log::info!("Usage monitor stopped");
    }

    /// Registers a new bottleneck-event subscriber.
    ///
    /// Events that arrive while the subscriber's buffer is full are dropped
    /// for that subscriber; a disconnected subscriber is pruned.
    pub fn subscribe(&self) -> Receiver<BottleneckEvent> {
        let (tx, rx) = crossbeam_channel::bounded(self.config.event_buffer);
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    /// Moving average of `kind` over the trailing `over` period.
    pub fn average(&self, kind: MetricKind, over: Duration) -> Option<f64> {
        self.window.read().unwrap().average_over(kind, over)
    }

    /// The most recently sampled value of `kind`.
    pub fn latest(&self, kind: MetricKind) -> Option<f64> {
        self.window.read().unwrap().latest(kind)
    }

    /// Per-metric averages over the last minute, for periodic consumers.
    pub fn averages(&self) -> ResourceAverages {
        let window = self.window.read().unwrap();
        ResourceAverages {
            cpu: window.average_over(MetricKind::Cpu, SNAPSHOT_WINDOW),
            memory: window.average_over(MetricKind::Memory, SNAPSHOT_WINDOW),
            latency: window.average_over(MetricKind::Latency, SNAPSHOT_WINDOW),
            error_rate: window.average_over(MetricKind::ErrorRate, SNAPSHOT_WINDOW),
        }
    }

    /// Number of currently registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}

impl Drop for UsageMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn dispatch(subscribers: &Mutex<Vec<Sender<BottleneckEvent>>>, event: BottleneckEvent) {
    let mut subscribers = subscribers.lock().unwrap();
    subscribers.retain(|tx| match tx.try_send(event) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            log::warn!(
                "Subscriber event buffer full, dropping {} {} event",
                event.severity,
                event.kind
            );
            true
        }
        Err(TrySendError::Disconnected(_)) => false,
    });
}
