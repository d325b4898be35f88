// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pool and scheduler configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::allocator::Allocator;
use crate::error::{PoolError, PoolResult};
use crate::expiration::{Expiration, TimeExpiration};

/// How long a blocking call is willing to wait.
///
/// A thin newtype over [`Duration`]: the distilled spec this crate grew
/// from describes timeouts as a `(value, unit)` pair, which Rust's
/// `Duration` already models directly, so there's no separate unit to carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeout(Duration);

impl Timeout {
    pub const fn new(duration: Duration) -> Self {
        Self(duration)
    }

    /// A timeout of zero: `claim` returns immediately, succeeding only if a
    /// slot is already available.
    pub const ZERO: Timeout = Timeout(Duration::ZERO);

    pub fn duration(self) -> Duration {
        self.0
    }
}

impl From<Duration> for Timeout {
    fn from(duration: Duration) -> Self {
        Self(duration)
    }
}

impl fmt::Display for Timeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

/// Sizing for the background scheduler's on-demand worker pool.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum number of worker threads spawned on demand.
    pub max_threads: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

/// Everything a [`crate::pool::Pool`] needs to start serving claims.
pub struct PoolConfig<T> {
    pub(crate) size: usize,
    /// Ceiling [`crate::pool::Pool::set_target_size`] may grow to. Fixed at
    /// construction because it sizes the pool's lock-free live-slot buffer,
    /// which cannot be resized after creation.
    pub(crate) max_size: usize,
    pub(crate) allocator: Arc<dyn Allocator<T>>,
    pub(crate) expiration: Arc<dyn Expiration<T>>,
    pub(crate) scheduler: Option<SchedulerConfig>,
}

impl<T> PoolConfig<T> {
    /// Start building a configuration with a fixed target size and the
    /// given allocator. Defaults to never expiring objects; attach one with
    /// [`Self::with_expiration`]. The growth ceiling defaults to `size`;
    /// raise it with [`Self::with_max_size`] if the pool will need to grow
    /// at runtime.
    pub fn new(size: usize, allocator: impl Allocator<T> + 'static) -> Self
    where
        T: 'static,
    {
        Self {
            size,
            max_size: size,
            allocator: Arc::new(allocator),
            expiration: Arc::new(TimeExpiration::never()),
            scheduler: None,
        }
    }

    pub fn with_expiration(mut self, expiration: impl Expiration<T> + 'static) -> Self
    where
        T: 'static,
    {
        self.expiration = Arc::new(expiration);
        self
    }

    pub fn with_scheduler_config(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    /// Raise the ceiling [`crate::pool::Pool::set_target_size`] may grow to.
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub(crate) fn validate(&self) -> PoolResult<()> {
        if self.size == 0 {
            return Err(PoolError::illegal_argument(
                "pool target size must be at least 1",
            ));
        }
        if self.max_size < self.size {
            return Err(PoolError::illegal_argument(
                "pool max size must be at least as large as the initial size",
            ));
        }
        Ok(())
    }
}
