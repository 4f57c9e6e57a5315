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

//! The default, OS-backed metrics source.

use anyhow::{bail, Context};
use std::sync::{Arc, Mutex};
use sysinfo::System;
use trimtab_core::metric::MetricKind;
use trimtab_core::source::MetricsSource;

/// A [`MetricsSource`] that reads CPU and memory utilization from the
/// operating system via `sysinfo`.
///
/// Latency and error rate are application-level signals the OS cannot see;
/// they delegate to an optional inner source supplied by the application.
/// Without one, those kinds report an error and the monitor skips the
/// cycle.
pub struct SystemMetricsSource {
    system: Mutex<System>,
    app_source: Option<Arc<dyn MetricsSource>>,
}

impl SystemMetricsSource {
    /// Creates a source covering CPU and memory only.
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            app_source: None,
        }
    }

    /// Creates a source that also answers latency/error-rate queries
    /// through the application-supplied `inner`.
    pub fn with_app_source(inner: Arc<dyn MetricsSource>) -> Self {
        Self {
            system: Mutex::new(System::new()),
            app_source: Some(inner),
        }
    }
}

impl Default for SystemMetricsSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSource for SystemMetricsSource {
    fn sample(&self, kind: MetricKind) -> anyhow::Result<f64> {
        match kind {
            MetricKind::Cpu => {
                let mut system = self.system.lock().unwrap();
                system.refresh_cpu_usage();
                Ok(f64::from(system.global_cpu_usage()))
            }
            MetricKind::Memory => {
                let mut system = self.system.lock().unwrap();
                system.refresh_memory();
                let total = system.total_memory();
                if total == 0 {
                    bail!("total memory reported as zero");
                }
                Ok(system.used_memory() as f64 / total as f64 * 100.0)
            }
            MetricKind::Latency | MetricKind::ErrorRate => match &self.app_source {
                Some(inner) => inner
                    .sample(kind)
                    .with_context(|| format!("application source failed for {kind}")),
                None => bail!("no application source configured for {kind}"),
            },
        }
    }
}
