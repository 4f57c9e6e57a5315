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

//! Admission control: throttling, priority queueing, and bottleneck
//! reactions.

use crate::breaker::CircuitBreaker;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::collections::VecDeque;
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread;
use std::time::{Duration, Instant};
use trimtab_core::governance::{AdmissionGate, GovernedCache, GovernedPool};
use trimtab_core::metric::{BottleneckEvent, MetricKind, Severity};
use trimtab_core::predict::SuggestedLimits;
use trimtab_core::source::MetricsSource;

/// How long the reaction thread waits per receive before re-checking its
/// running flag.
const REACTION_POLL: Duration = Duration::from_millis(100);

/// Scheduling priority of a governed task. FIFO within a priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskPriority {
    /// Runs even while throttling and while the circuit breaker is open.
    High,
    /// Deferred during throttling.
    Medium,
    /// Deferred during throttling, first to be left queued.
    Low,
}

impl TaskPriority {
    fn index(self) -> usize {
        match self {
            TaskPriority::High => 0,
            TaskPriority::Medium => 1,
            TaskPriority::Low => 2,
        }
    }
}

/// Fast rejection returned by [`AdmissionController::execute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskRejected {
    /// The circuit breaker is open; only high-priority work is admitted.
    CircuitOpen,
}

impl Display for TaskRejected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskRejected::CircuitOpen => write!(f, "Task rejected: circuit breaker open"),
        }
    }
}

impl std::error::Error for TaskRejected {}

/// Configuration for the [`AdmissionController`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdmissionConfig {
    /// Initial ceiling on concurrently executing tasks.
    pub max_concurrent: usize,
    /// Batch-size hint callers read back; restored toward this by
    /// warning-level optimization.
    pub default_batch_size: usize,
    /// Floor the batch-size hint never shrinks below.
    pub min_batch_size: usize,
    /// How long throttling stays armed after its last trigger.
    pub cooldown: Duration,
    /// How long the circuit breaker stays open before probing recovery.
    pub breaker_cooldown: Duration,
    /// Error rate below which the breaker may re-close.
    pub breaker_error_threshold: f64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 64,
            default_batch_size: 50,
            min_batch_size: 5,
            cooldown: Duration::from_secs(30),
            breaker_cooldown: Duration::from_secs(60),
            breaker_error_threshold: 0.10,
        }
    }
}

struct AdmissionState {
    active: usize,
    max_concurrent: usize,
    batch_size: usize,
    task_timeout: Duration,
    /// One FIFO queue of tickets per priority, indexed by
    /// [`TaskPriority::index`].
    queues: [VecDeque<u64>; 3],
    next_ticket: u64,
    /// Armed deadline of the single global throttle cooldown. Re-armed by
    /// every trigger; cleared lazily once it passes.
    throttle_until: Option<Instant>,
}

impl AdmissionState {
    fn is_throttling(&mut self, now: Instant) -> bool {
        match self.throttle_until {
            Some(deadline) if now >= deadline => {
                log::info!("Throttling cooldown elapsed; admissions back to normal");
                self.throttle_until = None;
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    fn may_run(&mut self, priority: TaskPriority, now: Instant) -> bool {
        self.active < self.max_concurrent
            && (priority == TaskPriority::High || !self.is_throttling(now))
    }

    /// A newcomer must queue behind waiters of its own or higher priority.
    fn must_queue_behind(&self, priority: TaskPriority) -> bool {
        self.queues[..=priority.index()].iter().any(|q| !q.is_empty())
    }

    /// Whether `ticket` is the next waiter the controller would admit.
    fn is_head(&self, ticket: u64, priority: TaskPriority) -> bool {
        if self.queues[..priority.index()].iter().any(|q| !q.is_empty()) {
            return false;
        }
        self.queues[priority.index()].front() == Some(&ticket)
    }

    fn queue_len(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }
}

struct ReactionHandle {
    running: Arc<AtomicBool>,
    thread: thread::JoinHandle<()>,
}

/// Governs concurrent task execution against bottleneck signals.
///
/// [`execute`](Self::execute) admits a task immediately when capacity
/// allows, otherwise the caller waits in a priority-then-FIFO queue.
/// Bottleneck events (consumed reactively from a monitor subscription)
/// arm a single global throttle cooldown, adjust the batch-size hint, trip
/// the circuit breaker, and drive pressure relief on an attached cache and
/// pool. Task results and failures propagate to the caller untouched; the
/// controller only governs scheduling.
pub struct AdmissionController {
    config: AdmissionConfig,
    state: Mutex<AdmissionState>,
    admitted: Condvar,
    breaker: CircuitBreaker,
    cache: Mutex<Option<Arc<dyn GovernedCache>>>,
    pool: Mutex<Option<Arc<dyn GovernedPool>>>,
    reaction: Mutex<Option<ReactionHandle>>,
}

impl AdmissionController {
    /// Creates a controller. The optional metrics source lets the circuit
    /// breaker probe error-rate recovery before re-closing.
    pub fn new(config: AdmissionConfig, metrics_source: Option<Arc<dyn MetricsSource>>) -> Self {
        Self {
            breaker: CircuitBreaker::new(
                config.breaker_cooldown,
                config.breaker_error_threshold,
                metrics_source,
            ),
            state: Mutex::new(AdmissionState {
                active: 0,
                max_concurrent: config.max_concurrent,
                batch_size: config.default_batch_size,
                task_timeout: Duration::from_secs(30),
                queues: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
                next_ticket: 0,
                throttle_until: None,
            }),
            admitted: Condvar::new(),
            cache: Mutex::new(None),
            pool: Mutex::new(None),
            reaction: Mutex::new(None),
            config,
        }
    }

    /// Attaches the cache the bottleneck responses relieve pressure on.
    pub fn attach_cache(&self, cache: Arc<dyn GovernedCache>) {
        *self.cache.lock().unwrap() = Some(cache);
    }

    /// Attaches the pool the bottleneck responses resize and recycle.
    pub fn attach_pool(&self, pool: Arc<dyn GovernedPool>) {
        *self.pool.lock().unwrap() = Some(pool);
    }

    /// Runs `task` under admission control.
    ///
    /// Admitted tasks run on the caller's thread; when capacity is
    /// exhausted, or throttling defers non-high work, the caller blocks in
    /// the priority queue until admitted. The task's own outcome (return
    /// value or panic) propagates untouched.
    pub fn execute<T>(
        &self,
        priority: TaskPriority,
        task: impl FnOnce() -> T,
    ) -> Result<T, TaskRejected> {
        if priority != TaskPriority::High && self.breaker.is_open() {
            return Err(TaskRejected::CircuitOpen);
        }

        self.admit(priority);
        let _slot = ActiveSlot { controller: self };
        Ok(task())
    }

    fn admit(&self, priority: TaskPriority) {
        let mut state = self.state.lock().unwrap();
        let now = Instant::now();
        if !state.must_queue_behind(priority) && state.may_run(priority, now) {
            state.active += 1;
            return;
        }

        state.next_ticket += 1;
        let ticket = state.next_ticket;
        state.queues[priority.index()].push_back(ticket);

        loop {
            let now = Instant::now();
            if state.is_head(ticket, priority) && state.may_run(priority, now) {
                state.queues[priority.index()].pop_front();
                state.active += 1;
                // Cascade: remaining capacity may admit the next head.
                self.admitted.notify_all();
                return;
            }

            // A throttled waiter sleeps at most until the cooldown
            // deadline, then re-checks; everyone else waits for a wake
            // from a completion or a limit change.
            let nap = if priority == TaskPriority::High {
                None
            } else {
                state
                    .throttle_until
                    .and_then(|deadline| deadline.checked_duration_since(now))
            };
            state = match nap {
                Some(until_deadline) => {
                    self.admitted
                        .wait_timeout(state, until_deadline + Duration::from_millis(1))
                        .unwrap()
                        .0
                }
                None => self.admitted.wait(state).unwrap(),
            };
        }
    }

    /// Arms (or re-arms) the global throttle cooldown.
    pub fn enable_throttling(&self) {
        let mut state = self.state.lock().unwrap();
        let newly = state.throttle_until.is_none();
        state.throttle_until = Some(Instant::now() + self.config.cooldown);
        drop(state);
        if newly {
            log::info!("Throttling enabled for {:?}", self.config.cooldown);
        }
        self.admitted.notify_all();
    }

    /// Whether throttling is currently armed.
    pub fn is_throttling(&self) -> bool {
        self.state.lock().unwrap().is_throttling(Instant::now())
    }

    /// Opens the circuit breaker.
    pub fn trip_breaker(&self) {
        self.breaker.trip();
    }

    /// Whether the circuit breaker currently rejects non-high work.
    pub fn breaker_open(&self) -> bool {
        self.breaker.is_open()
    }

    /// Applies predictor-suggested limits.
    pub fn apply_limits(&self, limits: &SuggestedLimits) {
        let mut state = self.state.lock().unwrap();
        state.max_concurrent = limits.max_concurrent.max(1);
        state.batch_size = limits.batch_size.max(self.config.min_batch_size);
        state.task_timeout = Duration::from_millis(limits.timeout_ms);
        drop(state);
        log::info!(
            "Applied limits: max_concurrent={}, batch_size={}, timeout={}ms",
            limits.max_concurrent.max(1),
            limits.batch_size,
            limits.timeout_ms
        );
        self.admitted.notify_all();
    }

    /// Applies the response table to one bottleneck event. Runs on the
    /// reaction thread when [`start`](Self::start) is used, but callable
    /// directly.
    pub fn on_bottleneck(&self, event: BottleneckEvent) {
        log::info!(
            "Reacting to {} {} bottleneck (value {:.2}, threshold {:.2})",
            event.severity,
            event.kind,
            event.value,
            event.threshold
        );
        match (event.kind, event.severity) {
            (MetricKind::Cpu, Severity::Critical) => {
                self.enable_throttling();
                self.shrink_batch_size();
                if let Some(cache) = self.attached_cache() {
                    cache.clear_low_priority();
                }
            }
            (MetricKind::Cpu, Severity::Warning) => {
                self.enable_throttling();
                self.optimize_batch_size();
            }
            (MetricKind::Memory, Severity::Critical) => {
                if let Some(cache) = self.attached_cache() {
                    cache.clear();
                }
                if let Some(pool) = self.attached_pool() {
                    pool.shrink_to_min();
                }
                self.enable_throttling();
            }
            (MetricKind::Memory, Severity::Warning) => {
                if let Some(cache) = self.attached_cache() {
                    cache.clear_expired();
                }
                if let Some(pool) = self.attached_pool() {
                    pool.reap_idle_now();
                }
            }
            (MetricKind::Latency, Severity::Critical) => {
                self.enable_throttling();
                if let Some(pool) = self.attached_pool() {
                    pool.recycle_idle();
                }
            }
            (MetricKind::Latency, Severity::Warning) => {}
            (MetricKind::ErrorRate, Severity::Critical) => {
                self.breaker.trip();
                self.enable_throttling();
            }
            (MetricKind::ErrorRate, Severity::Warning) => {
                self.enable_throttling();
            }
        }
    }

    /// Spawns the reaction thread consuming `events`. Idempotent.
    pub fn start(self: &Arc<Self>, events: Receiver<BottleneckEvent>) {
        let mut reaction = self.reaction.lock().unwrap();
        if reaction.is_some() {
            return;
        }

        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let controller: Weak<AdmissionController> = Arc::downgrade(self);

        let thread = thread::spawn(move || {
            log::info!("Admission reaction thread started");
            while flag.load(Ordering::SeqCst) {
                match events.recv_timeout(REACTION_POLL) {
                    Ok(event) => match controller.upgrade() {
                        Some(controller) => controller.on_bottleneck(event),
                        None => break,
                    },
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            log::info!("Admission reaction thread stopped");
        });

        *reaction = Some(ReactionHandle { running, thread });
    }

    /// Stops and joins the reaction thread. Idempotent.
    pub fn stop(&self) {
        if let Some(handle) = self.reaction.lock().unwrap().take() {
            handle.running.store(false, Ordering::SeqCst);
            let _ = handle.thread.join();
        }
    }

    /// Tasks currently executing.
    pub fn active_count(&self) -> usize {
        self.state.lock().unwrap().active
    }

    /// Tasks currently queued across all priorities.
    pub fn queue_len(&self) -> usize {
        self.state.lock().unwrap().queue_len()
    }

    /// The current batch-size hint.
    pub fn batch_size(&self) -> usize {
        self.state.lock().unwrap().batch_size
    }

    /// The current concurrency ceiling.
    pub fn max_concurrent(&self) -> usize {
        self.state.lock().unwrap().max_concurrent
    }

    /// The current per-task timeout hint.
    pub fn task_timeout(&self) -> Duration {
        self.state.lock().unwrap().task_timeout
    }

    fn shrink_batch_size(&self) {
        let mut state = self.state.lock().unwrap();
        state.batch_size = (state.batch_size / 2).max(self.config.min_batch_size);
        log::debug!("Batch size shrunk to {}", state.batch_size);
    }

    /// Moves the batch-size hint halfway back toward the configured
    /// default.
    fn optimize_batch_size(&self) {
        let mut state = self.state.lock().unwrap();
        state.batch_size = ((state.batch_size + self.config.default_batch_size) / 2)
            .max(self.config.min_batch_size);
        log::debug!("Batch size adjusted to {}", state.batch_size);
    }

    fn attached_cache(&self) -> Option<Arc<dyn GovernedCache>> {
        self.cache.lock().unwrap().clone()
    }

    fn attached_pool(&self) -> Option<Arc<dyn GovernedPool>> {
        self.pool.lock().unwrap().clone()
    }
}

impl Drop for AdmissionController {
    fn drop(&mut self) {
        self.stop();
    }
}

impl AdmissionGate for AdmissionController {
    fn is_throttling(&self) -> bool {
        AdmissionController::is_throttling(self)
    }

    fn max_concurrency(&self) -> usize {
        self.max_concurrent()
    }
}

/// Panic-safe holder of one admission slot: the active count is released
/// and the queue head woken however the task exits.
struct ActiveSlot<'a> {
    controller: &'a AdmissionController,
}

impl Drop for ActiveSlot<'_> {
    fn drop(&mut self) {
        let mut state = self.controller.state.lock().unwrap();
        state.active -= 1;
        drop(state);
        self.controller.admitted.notify_all();
    }
}
