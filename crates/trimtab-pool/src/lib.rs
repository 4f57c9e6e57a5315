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

//! # Trimtab Pool
//!
//! A bounded manager for externally created resources (connections,
//! clients, handles): acquire/release with FIFO waiter hand-off, bounded
//! validate-and-replace, acquire timeouts, idle reaping that respects the
//! minimum size, and idempotent shutdown.

pub mod error;
pub mod factory;
pub mod pool;

pub use error::{PoolError, PoolResult};
pub use factory::ResourceFactory;
pub use pool::{Lease, PoolConfig, ResourcePool};
