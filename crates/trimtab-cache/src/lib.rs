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

//! # Trimtab Cache
//!
//! A generic, size-bounded key/value cache with pluggable eviction
//! (LRU/LFU/FIFO), optional per-entry maximum age, percentile-based
//! low-priority clearing, and the governance hooks the adaptive layer
//! drives for pressure relief.

pub mod cache;
pub mod config;

pub use cache::{CacheStats, EvictingCache};
pub use config::{CacheConfig, EvictionPolicy};
