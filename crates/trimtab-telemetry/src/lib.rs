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

//! # Trimtab Telemetry
//!
//! Usage monitoring for the governance core: a rolling, time-retained
//! sample store, the [`UsageMonitor`] that samples metrics on independent
//! timers and dispatches bottleneck events, and a `sysinfo`-backed default
//! metrics source.

pub mod monitor;
pub mod system_source;
pub mod window;

pub use monitor::{MonitorConfig, ResourceAverages, SampleIntervals, UsageMonitor};
pub use system_source::SystemMetricsSource;
pub use window::SampleWindow;
