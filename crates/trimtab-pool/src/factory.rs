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

//! The external resource factory seam.

/// Creates, validates, and destroys the resources a
/// [`ResourcePool`](crate::pool::ResourcePool) manages.
///
/// The pool owns each resource from `create` until `destroy`; `destroy` is
/// called exactly once per resource. A `destroy` failure is logged by the
/// pool and never retried or allowed to block pool operation.
pub trait ResourceFactory: Send + Sync + 'static {
    /// The pooled resource type.
    type Resource: Send + 'static;

    /// Creates a new resource. Failures propagate to the caller of
    /// `acquire` that needed the new resource.
    fn create(&self) -> anyhow::Result<Self::Resource>;

    /// Destroys a resource the pool is done with.
    fn destroy(&self, resource: Self::Resource) -> anyhow::Result<()>;

    /// Checks whether an idle resource is still usable. Only consulted
    /// when the pool is configured to validate on acquire.
    fn validate(&self, _resource: &Self::Resource) -> bool {
        true
    }
}
