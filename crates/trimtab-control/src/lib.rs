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

//! # Trimtab Control
//!
//! The governance layer: an admission controller that shapes concurrent
//! work against bottleneck signals (throttling, priority queueing, circuit
//! breaking) and the adaptive governor, a periodic control loop that
//! combines usage history, external load predictions, and hard critical
//! thresholds to adjust admission limits and cache capacity.

pub mod admission;
pub mod breaker;
pub mod governor;

pub use admission::{AdmissionConfig, AdmissionController, TaskPriority, TaskRejected};
pub use breaker::CircuitBreaker;
pub use governor::{AdaptiveGovernor, GovernorConfig, UsageSnapshot};
