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

//! # Trimtab Core
//!
//! Foundational crate containing traits, core types, and interface contracts
//! that define the governance core's architecture: metric and bottleneck
//! types, the metrics-source pull interface, the injectable scheduler port,
//! the prediction capability, and the seams through which the control layer
//! governs caches and resource pools.

#![warn(missing_docs)]

pub mod governance;
pub mod metric;
pub mod predict;
pub mod schedule;
pub mod source;

pub use metric::{BottleneckEvent, MetricKind, Severity, ThresholdConfig, UsageSample};
pub use schedule::{Scheduler, TaskHandle};
