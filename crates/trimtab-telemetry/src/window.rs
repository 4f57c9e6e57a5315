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

//! Rolling, time-retained storage for usage samples.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use trimtab_core::metric::{MetricKind, UsageSample};

/// A per-metric rolling window of [`UsageSample`]s.
///
/// Samples are appended in arrival order; anything older than the retention
/// period is purged on write and on query, so the store is bounded by
/// retention × sample rate.
#[derive(Debug)]
pub struct SampleWindow {
    retention: Duration,
    samples: HashMap<MetricKind, VecDeque<UsageSample>>,
}

impl SampleWindow {
    /// Creates an empty window that retains samples for `retention`.
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            samples: HashMap::new(),
        }
    }

    /// Appends a sample and purges anything that has aged out.
    pub fn push(&mut self, sample: UsageSample) {
        let queue = self.samples.entry(sample.kind).or_default();
        queue.push_back(sample);

        if let Some(cutoff) = Instant::now().checked_sub(self.retention) {
            while queue.front().is_some_and(|s| s.recorded_at < cutoff) {
                queue.pop_front();
            }
        }
    }

    /// Purges aged-out samples across every metric.
    pub fn purge_expired(&mut self) {
        let Some(cutoff) = Instant::now().checked_sub(self.retention) else {
            return;
        };
        for queue in self.samples.values_mut() {
            while queue.front().is_some_and(|s| s.recorded_at < cutoff) {
                queue.pop_front();
            }
        }
    }

    /// Moving average of `kind` over the trailing `over` period.
    ///
    /// Returns `None` when no retained sample falls inside the period.
    pub fn average_over(&self, kind: MetricKind, over: Duration) -> Option<f64> {
        let queue = self.samples.get(&kind)?;
        // A period longer than the process uptime covers everything retained.
        let cutoff = Instant::now().checked_sub(over);

        let mut sum = 0.0;
        let mut count = 0usize;
        for sample in queue.iter().rev() {
            if cutoff.is_some_and(|c| sample.recorded_at < c) {
                break;
            }
            sum += sample.value;
            count += 1;
        }

        (count > 0).then(|| sum / count as f64)
    }

    /// The most recently recorded value of `kind`.
    pub fn latest(&self, kind: MetricKind) -> Option<f64> {
        self.samples.get(&kind)?.back().map(|s| s.value)
    }

    /// Number of retained samples for `kind`.
    pub fn sample_count(&self, kind: MetricKind) -> usize {
        self.samples.get(&kind).map_or(0, VecDeque::len)
    }
}
