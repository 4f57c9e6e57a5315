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

//! Cache configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The rule for choosing an eviction victim when capacity is exceeded.
///
/// Ties are broken by insertion order (stable: the earliest-inserted entry
/// among the tied loses).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvictionPolicy {
    /// Evicts the least recently accessed entry.
    Lru,
    /// Evicts the least frequently accessed entry.
    Lfu,
    /// Evicts the earliest-inserted entry.
    Fifo,
}

/// Configuration for an [`EvictingCache`](crate::cache::EvictingCache).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Capacity, as the sum of entry sizes in bytes.
    pub max_size_bytes: usize,
    /// Entries older than this are treated as absent. `None` disables
    /// age-based expiry.
    pub max_age: Option<Duration>,
    /// The eviction policy.
    pub policy: EvictionPolicy,
    /// Fraction of entries (by lowest access count) removed by a
    /// low-priority clear.
    pub low_priority_fraction: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: 64 * 1024 * 1024,
            max_age: None,
            policy: EvictionPolicy::Lru,
            low_priority_fraction: 0.25,
        }
    }
}
