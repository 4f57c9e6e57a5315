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

//! The periodic adaptive control loop.
//!
//! Each tick the governor assembles a usage snapshot, enforces hard
//! critical thresholds through per-resource emergency handlers, and, when
//! outside its cooldown, consults the external predictor, applying
//! suggested limits and a pressure-derived cache target only when the
//! prediction is confident enough.

use crate::admission::AdmissionController;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use trimtab_core::governance::{GovernedCache, GovernedPool};
use trimtab_core::metric::{MetricKind, ThresholdConfig, ThresholdLevels};
use trimtab_core::predict::{PredictionContext, Predictor};
use trimtab_core::schedule::{Scheduler, TaskHandle};
use trimtab_telemetry::monitor::UsageMonitor;

/// Configuration for the [`AdaptiveGovernor`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GovernorConfig {
    /// How often the control loop ticks.
    pub update_interval: Duration,
    /// Minimum spacing between prediction-driven adjustments.
    pub cooldown_period: Duration,
    /// Fraction of the gap toward the desired cache target applied per
    /// adjustment (0.0–1.0); smaller values damp oscillation.
    pub scaling_factor: f64,
    /// Lower bound for the cache capacity target.
    pub cache_floor_bytes: usize,
    /// Upper bound for the cache capacity target.
    pub cache_ceiling_bytes: usize,
    /// Hard critical thresholds enforced every tick, independent of
    /// prediction confidence. Typically tighter than the monitor's.
    pub hard_thresholds: ThresholdConfig,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_secs(5),
            cooldown_period: Duration::from_secs(30),
            scaling_factor: 0.5,
            cache_floor_bytes: 16 * 1024 * 1024,
            cache_ceiling_bytes: 256 * 1024 * 1024,
            hard_thresholds: ThresholdConfig {
                cpu: ThresholdLevels::new(90.0, 95.0),
                memory: ThresholdLevels::new(90.0, 95.0),
                latency: ThresholdLevels::new(2000.0, 5000.0),
                error_rate: ThresholdLevels::new(0.10, 0.20),
            },
        }
    }
}

/// One tick's view of system pressure.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UsageSnapshot {
    /// Average CPU utilization over the last minute, percent.
    pub cpu: Option<f64>,
    /// Average memory utilization over the last minute, percent.
    pub memory: Option<f64>,
    /// Average latency over the last minute, milliseconds.
    pub latency: Option<f64>,
    /// Average error rate over the last minute, fraction.
    pub error_rate: Option<f64>,
    /// Resources currently leased from the pool.
    pub active_connections: usize,
    /// Resources currently idle in the pool.
    pub idle_connections: usize,
    /// Tasks currently queued for admission.
    pub queue_length: usize,
}

impl UsageSnapshot {
    fn for_kind(&self, kind: MetricKind) -> Option<f64> {
        match kind {
            MetricKind::Cpu => self.cpu,
            MetricKind::Memory => self.memory,
            MetricKind::Latency => self.latency,
            MetricKind::ErrorRate => self.error_rate,
        }
    }
}

#[derive(Debug, Default)]
struct GovernorState {
    last_adjustment: Option<Instant>,
    /// Guards against overlapping prediction consultations.
    adjusting: bool,
    adjustment_count: u64,
}

/// The periodic controller tying monitoring, prediction, admission limits,
/// and cache capacity together.
pub struct AdaptiveGovernor {
    config: GovernorConfig,
    monitor: Arc<UsageMonitor>,
    controller: Arc<AdmissionController>,
    cache: Arc<dyn GovernedCache>,
    pool: Arc<dyn GovernedPool>,
    predictor: Arc<dyn Predictor>,
    scheduler: Arc<dyn Scheduler>,
    state: Mutex<GovernorState>,
    handle: Mutex<Option<TaskHandle>>,
}

impl AdaptiveGovernor {
    /// Creates a governor. Call [`start`](Self::start) to begin ticking.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: GovernorConfig,
        monitor: Arc<UsageMonitor>,
        controller: Arc<AdmissionController>,
        cache: Arc<dyn GovernedCache>,
        pool: Arc<dyn GovernedPool>,
        predictor: Arc<dyn Predictor>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        Self {
            config,
            monitor,
            controller,
            cache,
            pool,
            predictor,
            scheduler,
            state: Mutex::new(GovernorState::default()),
            handle: Mutex::new(None),
        }
    }

    /// Schedules the periodic tick. Idempotent.
    pub fn start(self: &Arc<Self>) {
        let mut handle = self.handle.lock().unwrap();
        if handle.is_some() {
            return;
        }

        let governor: Weak<AdaptiveGovernor> = Arc::downgrade(self);
        *handle = Some(self.scheduler.repeat(
            self.config.update_interval,
            Box::new(move || {
                if let Some(governor) = governor.upgrade() {
                    governor.tick();
                }
            }),
        ));
        log::info!(
            "Adaptive governor started (interval {:?})",
            self.config.update_interval
        );
    }

    /// Cancels the periodic tick. Idempotent.
    pub fn stop(&self) {
        if let Some(handle) = self.handle.lock().unwrap().take() {
            handle.cancel();
            log::info!("Adaptive governor stopped");
        }
    }

    /// Runs one control cycle. Normally driven by the scheduler, but
    /// callable directly.
    pub fn tick(&self) {
        let snapshot = self.snapshot();
        self.enforce_hard_limits(&snapshot);
        self.consult_predictor(&snapshot);
    }

    /// When the last prediction-driven adjustment happened.
    pub fn last_adjustment(&self) -> Option<Instant> {
        self.state.lock().unwrap().last_adjustment
    }

    /// How many prediction-driven adjustments have been applied.
    pub fn adjustment_count(&self) -> u64 {
        self.state.lock().unwrap().adjustment_count
    }

    fn snapshot(&self) -> UsageSnapshot {
        let averages = self.monitor.averages();
        UsageSnapshot {
            cpu: averages.cpu,
            memory: averages.memory,
            latency: averages.latency,
            error_rate: averages.error_rate,
            active_connections: self.pool.active_count(),
            idle_connections: self.pool.idle_count(),
            queue_length: self.controller.queue_len(),
        }
    }

    /// The always-on safety net: per-resource emergency handlers fire the
    /// tick a hard critical level is breached, regardless of prediction
    /// confidence or the adjustment cooldown. Handlers are fire-and-forget;
    /// component-internal failures are logged where they occur and never
    /// abort the tick.
    fn enforce_hard_limits(&self, snapshot: &UsageSnapshot) {
        for kind in MetricKind::ALL {
            let Some(value) = snapshot.for_kind(kind) else {
                continue;
            };
            let critical = self.config.hard_thresholds.levels(kind).critical;
            if value < critical {
                continue;
            }

            log::warn!(
                "Hard {} limit breached ({:.2} >= {:.2}); running emergency handler",
                kind,
                value,
                critical
            );
            match kind {
                MetricKind::Cpu => {
                    self.controller.enable_throttling();
                    self.cache.clear_low_priority();
                }
                MetricKind::Memory => {
                    self.cache.clear();
                    self.pool.shrink_to_min();
                    self.controller.enable_throttling();
                }
                MetricKind::Latency => {
                    self.controller.enable_throttling();
                    self.pool.recycle_idle();
                }
                MetricKind::ErrorRate => {
                    self.controller.trip_breaker();
                    self.controller.enable_throttling();
                }
            }
        }
    }

    fn consult_predictor(&self, snapshot: &UsageSnapshot) {
        {
            let mut state = self.state.lock().unwrap();
            if state.adjusting {
                return;
            }
            if state
                .last_adjustment
                .is_some_and(|at| at.elapsed() < self.config.cooldown_period)
            {
                return;
            }
            state.adjusting = true;
        }

        let context = self.prediction_context(snapshot);
        match self.predictor.predict(&context) {
            Ok(result) if result.is_actionable() => {
                log::info!(
                    "Applying prediction: confidence {:.2}, estimated load {:.2}",
                    result.confidence,
                    result.estimated_load
                );
                self.controller.apply_limits(&result.suggested_limits);
                self.resize_cache(snapshot);

                let mut state = self.state.lock().unwrap();
                state.last_adjustment = Some(Instant::now());
                state.adjustment_count += 1;
                state.adjusting = false;
            }
            Ok(result) => {
                log::debug!(
                    "Ignoring low-confidence prediction ({:.2} < 0.8)",
                    result.confidence
                );
                self.state.lock().unwrap().adjusting = false;
            }
            Err(err) => {
                log::warn!("Predictor failed; keeping previous limits: {err:#}");
                self.state.lock().unwrap().adjusting = false;
            }
        }
    }

    fn prediction_context(&self, snapshot: &UsageSnapshot) -> PredictionContext {
        let cpu_load = snapshot.cpu.unwrap_or(0.0) / 100.0;
        let connection_load =
            snapshot.active_connections as f64 / self.pool.max_size().max(1) as f64;
        let (time_of_day_hours, day_of_week) = wall_clock_context();

        PredictionContext {
            current_load: cpu_load.max(connection_load).clamp(0.0, 1.0),
            time_of_day_hours,
            day_of_week,
            active_connections: snapshot.active_connections,
            queue_length: snapshot.queue_length,
        }
    }

    /// Moves the cache capacity target toward a pressure-derived desired
    /// size: low pressure earns a larger cache, bounded by the configured
    /// floor and ceiling, with `scaling_factor` damping each step.
    fn resize_cache(&self, snapshot: &UsageSnapshot) {
        let memory_pressure = snapshot.memory.unwrap_or(0.0) / 100.0;
        let connection_pressure =
            snapshot.active_connections as f64 / self.pool.max_size().max(1) as f64;
        let fill_pressure =
            self.cache.current_size_bytes() as f64 / self.cache.max_size_bytes().max(1) as f64;
        let pressure = memory_pressure
            .max(connection_pressure)
            .max(fill_pressure)
            .clamp(0.0, 1.0);

        let floor = self.config.cache_floor_bytes as f64;
        let ceiling = self.config.cache_ceiling_bytes as f64;
        let desired = floor + (1.0 - pressure) * (ceiling - floor);

        let current = self.cache.max_size_bytes() as f64;
        let target = (current + (desired - current) * self.config.scaling_factor)
            .clamp(floor, ceiling) as usize;

        if target != self.cache.max_size_bytes() {
            log::info!(
                "Cache target: {} -> {} bytes (pressure {:.2})",
                self.cache.max_size_bytes(),
                target,
                pressure
            );
            self.cache.resize(target);
        }
    }
}

impl Drop for AdaptiveGovernor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Hour of day (UTC) and day of week (0 = Monday) for the prediction
/// context.
fn wall_clock_context() -> (u8, u8) {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let hours = ((secs / 3600) % 24) as u8;
    // The epoch fell on a Thursday.
    let day = (((secs / 86_400) + 3) % 7) as u8;
    (hours, day)
}
