// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! A generic, bounded object pool with background allocation, expiration,
//! and shrinking.
//!
//! Claiming and releasing objects never allocates or deallocates on the
//! caller's thread: a pool's [`Allocator`] runs on background worker threads
//! owned by a process-wide [`BackgroundScheduler`], so a slow or failing
//! allocator affects how quickly slots become claimable, never how long an
//! in-flight `claim` call blocks beyond its timeout.
//!
//! ```no_run
//! use std::time::Duration;
//! use stormpot::{Allocator, PoolConfig, PoolResult, Pool, SlotInfo, Timeout};
//!
//! struct Connection;
//!
//! struct ConnectionAllocator;
//! impl Allocator<Connection> for ConnectionAllocator {
//!     fn allocate(&self, _info: &SlotInfo<'_, Connection>) -> PoolResult<Connection> {
//!         Ok(Connection)
//!     }
//! }
//!
//! # fn main() -> PoolResult<()> {
//! let pool = Pool::new(PoolConfig::new(10, ConnectionAllocator))?;
//! let conn = pool.claim(Timeout::from(Duration::from_secs(1)))?;
//! drop(conn); // returned to the pool
//! # Ok(())
//! # }
//! ```
//!
//! | Module | Responsibility |
//! |---|---|
//! | [`pool`] | Public façade: claim, release, resize, shut down |
//! | [`slot`] | Per-object state machine (live/claimed/dead/tombstone) |
//! | [`allocator`] | User-supplied build/teardown hook |
//! | [`expiration`] | User-supplied "should this be rebuilt?" policy |
//! | [`scheduler`] | Process-wide background thread pool and task queue |
//! | [`queue`] | The lock-free/blocking queues tying the above together |
//! | [`clock`] | Monotonic time sources for expiration checks and timeouts |
//! | [`config`] | [`PoolConfig`], [`config::Timeout`], [`config::SchedulerConfig`] |
//! | [`error`] | [`PoolError`] and [`error::PoolResult`] |

pub mod allocator;
pub mod clock;
pub mod config;
pub mod error;
pub mod expiration;
pub mod pool;
pub mod queue;
pub mod scheduler;
pub mod slot;

pub use allocator::Allocator;
pub use config::{PoolConfig, SchedulerConfig, Timeout};
pub use error::{PoolError, PoolResult};
pub use expiration::{Expiration, TimeExpiration};
pub use pool::{Claimed, Completion, Pool};
pub use scheduler::{BackgroundScheduler, ScheduledHandle};
pub use slot::SlotInfo;
