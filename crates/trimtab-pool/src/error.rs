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

//! Pool error taxonomy.

use std::fmt::Display;
use std::time::Duration;

/// A specialized `Result` type for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// An error surfaced by [`ResourcePool`](crate::pool::ResourcePool).
#[derive(Debug)]
pub enum PoolError {
    /// No resource became available within the acquire timeout. The pool
    /// keeps operating.
    AcquireTimeout {
        /// How long the caller waited.
        waited: Duration,
    },
    /// The pool is shutting down; all outstanding waiters receive this.
    PoolClosing,
    /// The external factory failed to create a resource.
    CreateFailed(anyhow::Error),
    /// Every replacement attempt for invalid idle resources failed
    /// validation.
    ValidationExhausted {
        /// How many invalid resources were destroyed before giving up.
        attempts: usize,
    },
}

impl Display for PoolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolError::AcquireTimeout { waited } => {
                write!(f, "Timed out acquiring a resource after {waited:?}")
            }
            PoolError::PoolClosing => write!(f, "Pool is closing"),
            PoolError::CreateFailed(err) => write!(f, "Resource creation failed: {err}"),
            PoolError::ValidationExhausted { attempts } => {
                write!(f, "Gave up after destroying {attempts} invalid resources")
            }
        }
    }
}

impl std::error::Error for PoolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PoolError::CreateFailed(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}
