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

//! The pull interface through which metric values enter the core.

use crate::metric::MetricKind;

/// A source of current metric values, polled by the monitoring layer.
///
/// Implementations live outside this core: an OS-level sampler, an
/// application metrics registry, or a test stub. The contract is pull-based;
/// the caller decides when and how often to sample.
///
/// Units follow [`MetricKind`]: percent for `Cpu`/`Memory`, milliseconds for
/// `Latency`, a fraction for `ErrorRate`.
///
/// A failed sample is not fatal to the caller: monitoring components log the
/// error and skip that cycle.
pub trait MetricsSource: Send + Sync + 'static {
    /// Returns the current value of `kind`.
    fn sample(&self, kind: MetricKind) -> anyhow::Result<f64>;
}
