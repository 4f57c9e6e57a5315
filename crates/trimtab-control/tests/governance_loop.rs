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

//! End-to-end wiring of the governance loop: monitor, admission
//! controller, cache, pool, and governor collaborating through their
//! public contracts only.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use trimtab_cache::{CacheConfig, EvictingCache};
use trimtab_control::{
    AdaptiveGovernor, AdmissionConfig, AdmissionController, GovernorConfig, TaskPriority,
};
use trimtab_core::governance::{AdmissionGate, GovernedCache, GovernedPool};
use trimtab_core::metric::MetricKind;
use trimtab_core::predict::{
    NoPredictor, PredictionContext, PredictionResult, Predictor, SuggestedLimits,
};
use trimtab_core::schedule::ManualScheduler;
use trimtab_core::source::MetricsSource;
use trimtab_pool::{PoolConfig, ResourceFactory, ResourcePool};
use trimtab_telemetry::{MonitorConfig, UsageMonitor};

struct SharedSource {
    values: Mutex<HashMap<MetricKind, f64>>,
}

impl SharedSource {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            values: Mutex::new(HashMap::new()),
        })
    }

    fn set(&self, kind: MetricKind, value: f64) {
        self.values.lock().unwrap().insert(kind, value);
    }
}

impl MetricsSource for SharedSource {
    fn sample(&self, kind: MetricKind) -> anyhow::Result<f64> {
        self.values
            .lock()
            .unwrap()
            .get(&kind)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("no value for {kind}"))
    }
}

struct ConnFactory {
    created: AtomicUsize,
}

impl ResourceFactory for ConnFactory {
    type Resource = usize;

    fn create(&self) -> anyhow::Result<usize> {
        Ok(self.created.fetch_add(1, Ordering::SeqCst))
    }

    fn destroy(&self, _resource: usize) -> anyhow::Result<()> {
        Ok(())
    }
}

struct ConfidentPredictor;

impl Predictor for ConfidentPredictor {
    fn predict(&self, _context: &PredictionContext) -> anyhow::Result<PredictionResult> {
        Ok(PredictionResult {
            estimated_load: 0.2,
            suggested_limits: SuggestedLimits {
                max_concurrent: 16,
                batch_size: 32,
                timeout_ms: 5000,
            },
            confidence: 0.95,
        })
    }
}

struct Loop {
    source: Arc<SharedSource>,
    scheduler: Arc<ManualScheduler>,
    monitor: Arc<UsageMonitor>,
    controller: Arc<AdmissionController>,
    cache: Arc<EvictingCache<String, Vec<u8>>>,
    pool: Arc<ResourcePool<ConnFactory>>,
}

fn wire(cooldown: Duration) -> Loop {
    let _ = env_logger::builder().is_test(true).try_init();
    let source = SharedSource::new();
    let scheduler = Arc::new(ManualScheduler::new());

    let monitor = Arc::new(UsageMonitor::new(
        MonitorConfig::default(),
        source.clone(),
        scheduler.clone(),
    ));
    monitor.start();

    let controller = Arc::new(AdmissionController::new(
        AdmissionConfig {
            cooldown,
            ..Default::default()
        },
        Some(source.clone() as Arc<dyn MetricsSource>),
    ));
    controller.start(monitor.subscribe());

    let cache = Arc::new(EvictingCache::new(CacheConfig {
        max_size_bytes: 4096,
        ..Default::default()
    }));
    controller.attach_cache(cache.clone() as Arc<dyn GovernedCache>);

    let factory = ConnFactory {
        created: AtomicUsize::new(0),
    };
    let pool = Arc::new(
        ResourcePool::new(
            factory,
            PoolConfig {
                min_size: 1,
                max_size: 4,
                acquire_timeout: Duration::from_millis(100),
                ..Default::default()
            },
            scheduler.as_ref(),
            Some(controller.clone() as Arc<dyn AdmissionGate>),
        )
        .expect("pool construction"),
    );
    controller.attach_pool(pool.clone() as Arc<dyn GovernedPool>);

    Loop {
        source,
        scheduler,
        monitor,
        controller,
        cache,
        pool,
    }
}

/// Lets the reaction thread drain events the monitor just dispatched.
fn settle() {
    thread::sleep(Duration::from_millis(150));
}

#[test]
fn test_cpu_spike_throttles_and_cooldown_recovers() {
    let looped = wire(Duration::from_millis(300));

    looped.source.set(MetricKind::Cpu, 95.0);
    looped.scheduler.tick_all();
    settle();

    assert!(looped.controller.is_throttling());

    // No further critical events; the cooldown elapses and admissions
    // return to normal.
    looped.source.set(MetricKind::Cpu, 10.0);
    thread::sleep(Duration::from_millis(350));
    assert!(!looped.controller.is_throttling());

    looped.controller.stop();
    looped.monitor.stop();
}

#[test]
fn test_memory_pressure_clears_real_cache() {
    let looped = wire(Duration::from_millis(300));

    looped.cache.insert("feed:1".to_string(), vec![0u8; 64], 64);
    looped.cache.insert("feed:2".to_string(), vec![0u8; 64], 64);
    assert_eq!(looped.cache.len(), 2);

    looped.source.set(MetricKind::Memory, 97.0);
    looped.scheduler.tick_all();
    settle();

    assert!(looped.cache.is_empty(), "memory-critical response clears the cache");
    assert!(looped.controller.is_throttling());

    looped.controller.stop();
    looped.monitor.stop();
}

#[test]
fn test_throttling_gates_pool_growth() {
    let looped = wire(Duration::from_millis(400));

    looped.source.set(MetricKind::Cpu, 95.0);
    looped.scheduler.tick_all();
    settle();
    assert!(looped.controller.is_throttling());

    // The single pre-filled resource is handed out; growth beyond the
    // minimum is deferred while throttling, so a second acquire waits
    // out its timeout instead of creating a connection.
    let held = looped.pool.acquire().unwrap();
    assert!(looped.pool.acquire().is_err());
    drop(held);

    looped.controller.stop();
    looped.monitor.stop();
}

#[test]
fn test_confident_prediction_adjusts_limits_and_cache() {
    let looped = wire(Duration::from_millis(300));
    let governor_scheduler = Arc::new(ManualScheduler::new());

    let governor = Arc::new(AdaptiveGovernor::new(
        GovernorConfig {
            cache_floor_bytes: 1024,
            cache_ceiling_bytes: 64 * 1024,
            ..Default::default()
        },
        looped.monitor.clone(),
        looped.controller.clone(),
        looped.cache.clone() as Arc<dyn GovernedCache>,
        looped.pool.clone() as Arc<dyn GovernedPool>,
        Arc::new(ConfidentPredictor),
        governor_scheduler.clone(),
    ));
    governor.start();

    looped.source.set(MetricKind::Cpu, 15.0);
    looped.source.set(MetricKind::Memory, 25.0);
    looped.scheduler.tick_all();
    governor_scheduler.tick_all();

    assert_eq!(governor.adjustment_count(), 1);
    assert_eq!(looped.controller.max_concurrent(), 16);
    assert_eq!(looped.controller.batch_size(), 32);
    // Low pressure grows the cache target from 4096 toward the ceiling.
    assert!(looped.cache.max_size_bytes() > 4096);

    governor.stop();
    looped.controller.stop();
    looped.monitor.stop();
}

#[test]
fn test_governed_work_flows_through_the_loop() {
    let looped = wire(Duration::from_millis(300));

    // Normal conditions: tasks at every priority run and their results
    // come back untouched.
    looped.source.set(MetricKind::Cpu, 10.0);
    looped.scheduler.tick_all();

    let lease = looped.pool.acquire().unwrap();
    let conn = *lease;
    drop(lease);

    let outcome = looped
        .controller
        .execute(TaskPriority::Medium, || format!("served by {conn}"))
        .unwrap();
    assert_eq!(outcome, "served by 0");

    // A governor with the default NoPredictor never adjusts anything.
    let governor = Arc::new(AdaptiveGovernor::new(
        GovernorConfig::default(),
        looped.monitor.clone(),
        looped.controller.clone(),
        looped.cache.clone() as Arc<dyn GovernedCache>,
        looped.pool.clone() as Arc<dyn GovernedPool>,
        Arc::new(NoPredictor),
        Arc::new(ManualScheduler::new()),
    ));
    governor.tick();
    assert_eq!(governor.adjustment_count(), 0);

    looped.controller.stop();
    looped.monitor.stop();
}
