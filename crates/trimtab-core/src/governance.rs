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

//! The seams through which the control layer governs other components.
//!
//! The admission controller and the adaptive governor never reach into a
//! cache's or a pool's internal state; every pressure-relief and resizing
//! action flows through these traits.

/// Governance surface of a size-bounded cache.
pub trait GovernedCache: Send + Sync + 'static {
    /// Updates the capacity, evicting immediately if over the new limit.
    fn resize(&self, max_size_bytes: usize);

    /// Drops every entry.
    fn clear(&self);

    /// Drops entries past their maximum age.
    fn clear_expired(&self);

    /// Drops the coldest entries, by access count.
    fn clear_low_priority(&self);

    /// Bytes currently stored.
    fn current_size_bytes(&self) -> usize;

    /// The configured capacity, in bytes.
    fn max_size_bytes(&self) -> usize;
}

/// Governance surface of a pooled-resource manager.
pub trait GovernedPool: Send + Sync + 'static {
    /// Destroys idle resources until the pool is back at its minimum size.
    fn shrink_to_min(&self);

    /// Destroys all idle resources so demand is served by fresh ones,
    /// then restores the minimum size.
    fn recycle_idle(&self);

    /// Runs an idle-timeout maintenance pass immediately.
    fn reap_idle_now(&self);

    /// Resources currently leased out.
    fn active_count(&self) -> usize;

    /// Resources currently idle in the pool.
    fn idle_count(&self) -> usize;

    /// The configured maximum pool size.
    fn max_size(&self) -> usize;
}

/// Shared view of admission state.
///
/// A pool constructed with a gate consults it before committing new
/// capacity, so throttling decisions shape resource growth as well as task
/// execution.
pub trait AdmissionGate: Send + Sync + 'static {
    /// `true` while the admission layer is deferring non-critical work.
    fn is_throttling(&self) -> bool;

    /// Current ceiling on concurrently executing tasks.
    fn max_concurrency(&self) -> usize;
}
