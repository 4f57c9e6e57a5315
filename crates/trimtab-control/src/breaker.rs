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

//! The error-rate circuit breaker.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use trimtab_core::metric::MetricKind;
use trimtab_core::source::MetricsSource;

#[derive(Debug, Clone, Copy)]
enum BreakerState {
    Closed,
    Open { since: Instant },
}

/// Fast-rejects non-critical work after sustained failures.
///
/// Tripped on a critical error-rate signal; re-closes after the cooldown
/// once the error rate sampled from the metrics source has recovered below
/// the threshold. Without a source, recovery is assumed once the cooldown
/// elapses. A sampling failure keeps the breaker open.
pub struct CircuitBreaker {
    cooldown: Duration,
    error_threshold: f64,
    source: Option<Arc<dyn MetricsSource>>,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    pub fn new(
        cooldown: Duration,
        error_threshold: f64,
        source: Option<Arc<dyn MetricsSource>>,
    ) -> Self {
        Self {
            cooldown,
            error_threshold,
            source,
            state: Mutex::new(BreakerState::Closed),
        }
    }

    /// Opens the breaker, restarting the cooldown if it was already open.
    pub fn trip(&self) {
        let mut state = self.state.lock().unwrap();
        if matches!(*state, BreakerState::Closed) {
            log::warn!("Circuit breaker opened");
        }
        *state = BreakerState::Open {
            since: Instant::now(),
        };
    }

    /// Whether the breaker currently rejects work. Re-closes lazily once
    /// the cooldown has elapsed and the error rate has recovered.
    pub fn is_open(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        match *state {
            BreakerState::Closed => false,
            BreakerState::Open { since } => {
                if since.elapsed() >= self.cooldown && self.recovered() {
                    log::info!("Circuit breaker closed: error rate recovered");
                    *state = BreakerState::Closed;
                    false
                } else {
                    true
                }
            }
        }
    }

    fn recovered(&self) -> bool {
        match &self.source {
            None => true,
            Some(source) => match source.sample(MetricKind::ErrorRate) {
                Ok(rate) => rate < self.error_threshold,
                Err(err) => {
                    log::debug!("Breaker recovery probe failed, staying open: {err:#}");
                    false
                }
            },
        }
    }
}
