// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The user-supplied hook that builds and tears down pooled objects.

use crate::error::PoolResult;
use crate::slot::SlotInfo;

/// Builds and tears down the objects a [`crate::pool::Pool`] manages.
///
/// Implementations run on background allocator worker threads, never on a
/// claimer's thread, so `allocate`/`deallocate` may block or take a while
/// without affecting claim latency directly (though a slow allocator does
/// mean slots take longer to become claimable).
pub trait Allocator<T>: Send + Sync {
    /// Build a new poolable object. `info` exposes the slot's age and claim
    /// history from its *previous* incarnation, which is zeroed for a
    /// slot's very first allocation; `info.poolable()` is `None` in that
    /// case since there is no previous object to inspect.
    fn allocate(&self, info: &SlotInfo<'_, T>) -> PoolResult<T>;

    /// Tear down an object that is leaving the pool, either because its
    /// slot expired or because the pool is shutting down.
    ///
    /// The default implementation does nothing, which is correct whenever
    /// `T`'s own `Drop` impl (if any) is sufficient.
    #[allow(unused_variables)]
    fn deallocate(&self, object: T) {}
}
