// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The public pool façade: claiming, releasing, resizing, and shutting down.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::allocator::Allocator;
use crate::clock::MonotonicTimeSource;
use crate::config::{PoolConfig, Timeout};
use crate::error::{PoolError, PoolResult};
use crate::expiration::Expiration;
use crate::queue::{DeadQueue, LiveQueue};
use crate::scheduler::{BackgroundScheduler, ScheduledHandle, SchedulerLease};
use crate::slot::Slot;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// How often the background replenishment sweep drains the dead queue, in
/// addition to the on-demand kicks `claim`/`set_target_size` issue.
const REPLENISH_INTERVAL: Duration = Duration::from_millis(10);

/// A bounded pool of reusable, lazily (re)allocated objects.
///
/// Allocation and deallocation always happen on background worker threads
/// owned by a [`BackgroundScheduler`], never on a claimer's thread — a slow
/// or failing `Allocator` delays how quickly slots become claimable, but
/// never blocks an in-flight `claim` call beyond its timeout.
pub struct Pool<T> {
    instance_id: u64,
    target_size: AtomicUsize,
    max_size: usize,
    live_count: AtomicUsize,
    alloc_count: AtomicU64,
    shutting_down: AtomicBool,
    live_queue: LiveQueue<Arc<Slot<T>>>,
    dead_queue: Arc<DeadQueue<T>>,
    allocator: Arc<dyn Allocator<T>>,
    expiration: Arc<dyn Expiration<T>>,
    clock: Arc<dyn MonotonicTimeSource>,
    lease: SchedulerLease,
    sweep_handle: ScheduledHandle,
    shutdown_state: Arc<ShutdownState>,
    self_weak: Weak<Pool<T>>,
}

impl<T: Send + 'static> Pool<T> {
    /// Build and start a pool. Initial slots are queued for background
    /// allocation immediately; this call itself never allocates.
    pub fn new(config: PoolConfig<T>) -> PoolResult<Arc<Self>> {
        config.validate()?;
        let PoolConfig {
            size,
            max_size,
            allocator,
            expiration,
            scheduler,
        } = config;

        let scheduler = match scheduler {
            Some(scheduler_config) => BackgroundScheduler::new(scheduler_config),
            None => BackgroundScheduler::default_instance(),
        };
        let lease = scheduler.acquire();
        let clock = scheduler.clock();

        let instance_id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
        let dead_queue = Arc::new(DeadQueue::new());
        for _ in 0..size {
            dead_queue.push(Arc::new(Slot::new_dead(instance_id)));
        }

        let pool = Arc::new_cyclic(|weak: &Weak<Pool<T>>| {
            let sweep_target = Weak::clone(weak);
            let sweep_handle = lease
                .scheduler()
                .submit_scheduled(REPLENISH_INTERVAL, move || {
                    if let Some(pool) = sweep_target.upgrade() {
                        pool.replenish();
                    }
                });

            Pool {
                instance_id,
                target_size: AtomicUsize::new(size),
                max_size,
                live_count: AtomicUsize::new(size),
                alloc_count: AtomicU64::new(0),
                shutting_down: AtomicBool::new(false),
                live_queue: LiveQueue::new(max_size.max(1)),
                dead_queue,
                allocator,
                expiration,
                clock,
                lease,
                sweep_handle,
                shutdown_state: Arc::new(ShutdownState::new()),
                self_weak: Weak::clone(weak),
            }
        });

        Ok(pool)
    }

    /// Claim a slot, blocking up to `timeout` for one to become available.
    pub fn claim(&self, timeout: Timeout) -> PoolResult<Claimed<'_, T>> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(PoolError::PoolClosed);
        }

        let deadline = Instant::now() + timeout.duration();
        loop {
            if self.shutting_down.load(Ordering::Acquire) {
                return Err(PoolError::PoolClosed);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            let slot = match self.live_queue.claim(remaining) {
                Some(slot) => slot,
                None => return Err(PoolError::Timeout),
            };

            if let Some(poison) = slot.take_poison() {
                self.dead_queue.push(slot);
                self.kick_replenish();
                return Err(poison);
            }

            let now = self.clock.now_millis();
            if self.expiration.has_expired(&slot.info(now)) {
                slot.mark_dead();
                if let Some(object) = slot.take_poolable() {
                    self.allocator.deallocate(object);
                }
                self.dead_queue.push(slot);
                self.kick_replenish();
                continue;
            }

            slot.mark_claimed();
            return Ok(Claimed::new(self, slot));
        }
    }

    /// Current target size (the number of slots the pool tries to keep
    /// live, claimed, or queued for allocation).
    pub fn target_size(&self) -> usize {
        self.target_size.load(Ordering::Acquire)
    }

    /// Resize the pool. Growing queues new dead slots for background
    /// allocation; shrinking reclaims currently-idle live slots immediately
    /// and relies on [`Claimed`]'s `Drop` to reclaim the rest as they are
    /// released.
    pub fn set_target_size(&self, new_size: usize) -> PoolResult<()> {
        if new_size == 0 {
            return Err(PoolError::illegal_argument(
                "pool target size must be at least 1",
            ));
        }
        if new_size > self.max_size {
            return Err(PoolError::illegal_argument(format!(
                "target size {new_size} exceeds this pool's max size of {}",
                self.max_size
            )));
        }

        let old_size = self.target_size.swap(new_size, Ordering::AcqRel);
        if new_size < old_size {
            let excess = old_size - new_size;
            for _ in 0..excess {
                match self.live_queue.claim(Duration::ZERO) {
                    Some(slot) => {
                        self.retire(slot);
                        self.live_count.fetch_sub(1, Ordering::AcqRel);
                    }
                    None => break, // remaining excess unwinds as claimed slots are released
                }
            }
        } else if new_size > old_size {
            let growth = new_size - old_size;
            self.live_count.fetch_add(growth, Ordering::AcqRel);
            for _ in 0..growth {
                self.dead_queue.push(Arc::new(Slot::new_dead(self.instance_id)));
            }
            self.kick_replenish();
        }
        Ok(())
    }

    /// Stop accepting new work and tear down every slot once its claimer (if
    /// any) releases it. Returns a handle to await full completion.
    pub fn shutdown(&self) -> Completion {
        self.shutting_down.store(true, Ordering::Release);
        self.sweep_handle.cancel();

        let live = self.live_queue.drain();
        let dead = self.dead_queue.drain();
        let drained_count = live.len() + dead.len();
        let allocator = Arc::clone(&self.allocator);
        let state = Arc::clone(&self.shutdown_state);
        let pool = self
            .self_weak
            .upgrade()
            .expect("pool shutting down while still alive");

        self.lease.scheduler().submit_immediate(move || {
            for slot in live.into_iter().chain(dead.into_iter()) {
                slot.mark_dead();
                if let Some(object) = slot.take_poolable() {
                    allocator.deallocate(object);
                }
                slot.tombstone();
            }
            pool.live_count.fetch_sub(drained_count, Ordering::AcqRel);
            state.complete();
        });

        Completion {
            state: Arc::clone(&self.shutdown_state),
        }
    }

    pub fn alloc_count(&self) -> u64 {
        self.alloc_count.load(Ordering::Acquire)
    }

    /// Number of slots currently accounted for (live, claimed, or queued for
    /// allocation/deallocation) — distinct from [`Self::target_size`], which
    /// a resize in progress may not have fully caught up to yet.
    pub fn size(&self) -> usize {
        self.live_count.load(Ordering::Acquire)
    }

    fn replenish(&self) {
        if self.shutting_down.load(Ordering::Acquire) {
            return;
        }
        while let Some(slot) = self.dead_queue.pop() {
            if self.shutting_down.load(Ordering::Acquire) {
                self.dead_queue.push(slot);
                return;
            }
            let now = self.clock.now_millis();
            match self.allocator.allocate(&slot.info(now)) {
                Ok(object) => {
                    slot.publish(object, now);
                    self.alloc_count.fetch_add(1, Ordering::Relaxed);
                    self.live_queue.push(slot);
                }
                Err(err) => {
                    log::warn!(
                        "pool {} failed to allocate a slot: {err}",
                        self.instance_id
                    );
                    slot.poison(err);
                    self.live_queue.push(slot);
                }
            }
        }
    }

    fn kick_replenish(&self) {
        if let Some(pool) = self.self_weak.upgrade() {
            self.lease.scheduler().submit_immediate(move || pool.replenish());
        }
    }

    /// Tear down a live slot that is being permanently removed (shrink path).
    fn retire(&self, slot: Arc<Slot<T>>) {
        slot.mark_dead();
        if let Some(object) = slot.take_poolable() {
            self.allocator.deallocate(object);
        }
        slot.tombstone();
    }

    fn release(&self, slot: Arc<Slot<T>>, expire: bool) {
        if expire || self.shutting_down.load(Ordering::Acquire) {
            slot.mark_dead();
            if let Some(object) = slot.take_poolable() {
                self.allocator.deallocate(object);
            }
            if self.shutting_down.load(Ordering::Acquire) {
                slot.tombstone();
                self.live_count.fetch_sub(1, Ordering::AcqRel);
            } else {
                self.dead_queue.push(slot);
                self.kick_replenish();
            }
        } else {
            slot.mark_live();
            self.live_queue.push(slot);
        }
    }
}

/// An exclusively-owned, claimed object. Returned to the pool (or torn down,
/// if [`Self::expire`] was called) when dropped.
pub struct Claimed<'a, T> {
    pool: &'a Pool<T>,
    slot: Option<Arc<Slot<T>>>,
    expire: bool,
}

impl<'a, T> Claimed<'a, T> {
    fn new(pool: &'a Pool<T>, slot: Arc<Slot<T>>) -> Self {
        Self {
            pool,
            slot: Some(slot),
            expire: false,
        }
    }

    /// Mark this object for teardown instead of being returned to the live
    /// queue when dropped.
    pub fn expire(&mut self) {
        self.expire = true;
    }
}

impl<'a, T> Deref for Claimed<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: a Claimed's slot is CLAIMED for its entire lifetime, and
        // only this guard holds a reference to it.
        unsafe {
            self.slot
                .as_ref()
                .expect("slot taken before drop")
                .poolable_ref()
        }
    }
}

impl<'a, T> DerefMut for Claimed<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: see Deref.
        unsafe {
            self.slot
                .as_ref()
                .expect("slot taken before drop")
                .poolable_mut()
        }
    }
}

impl<'a, T> Drop for Claimed<'a, T> {
    fn drop(&mut self) {
        let slot = self.slot.take().expect("slot already released");
        self.pool.release(slot, self.expire);
    }
}

/// Internal wait/notify state backing a [`Completion`].
struct ShutdownState {
    done: AtomicBool,
    lock: Mutex<()>,
    condvar: Condvar,
}

impl ShutdownState {
    fn new() -> Self {
        Self {
            done: AtomicBool::new(false),
            lock: Mutex::new(()),
            condvar: Condvar::new(),
        }
    }

    fn complete(&self) {
        self.done.store(true, Ordering::Release);
        let _guard = self.lock.lock();
        self.condvar.notify_all();
    }

    fn is_complete(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    fn await_timeout(&self, timeout: Duration) -> bool {
        if self.is_complete() {
            return true;
        }
        let deadline = Instant::now() + timeout;
        loop {
            let mut guard = self.lock.lock();
            if self.is_complete() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.condvar.wait_for(&mut guard, deadline - now);
            drop(guard);
            if self.is_complete() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
        }
    }
}

/// A handle to a pool's in-progress shutdown.
pub struct Completion {
    state: Arc<ShutdownState>,
}

impl Completion {
    /// Block up to `timeout` for every slot to finish tearing down.
    /// Returns `true` if shutdown completed within the timeout.
    pub fn await_timeout(&self, timeout: Duration) -> bool {
        self.state.await_timeout(timeout)
    }

    pub fn is_complete(&self) -> bool {
        self.state.is_complete()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expiration::TimeExpiration;
    use crate::slot::SlotInfo;
    use std::sync::atomic::AtomicU32;

    struct CountingAllocator {
        next: AtomicU32,
    }
    impl Allocator<u32> for CountingAllocator {
        fn allocate(&self, _info: &SlotInfo<'_, u32>) -> PoolResult<u32> {
            Ok(self.next.fetch_add(1, Ordering::SeqCst))
        }
    }

    fn wait_until(mut predicate: impl FnMut() -> bool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if predicate() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        predicate()
    }

    #[test]
    fn claim_and_release_basic_cycle() {
        let config = PoolConfig::new(
            2,
            CountingAllocator {
                next: AtomicU32::new(0),
            },
        );
        let pool = Pool::new(config).unwrap();

        assert!(wait_until(|| pool.alloc_count() >= 2, Duration::from_secs(1)));

        let claimed = pool.claim(Timeout::from(Duration::from_millis(500))).unwrap();
        assert!(*claimed < 2);
        drop(claimed);

        let claimed_again = pool.claim(Timeout::from(Duration::from_millis(500))).unwrap();
        assert!(*claimed_again < 2);
    }

    #[test]
    fn claim_times_out_on_an_exhausted_pool() {
        let config = PoolConfig::new(
            1,
            CountingAllocator {
                next: AtomicU32::new(0),
            },
        );
        let pool = Pool::new(config).unwrap();
        assert!(wait_until(|| pool.alloc_count() >= 1, Duration::from_secs(1)));

        let _held = pool.claim(Timeout::from(Duration::from_millis(200))).unwrap();
        let second = pool.claim(Timeout::from(Duration::from_millis(50)));
        assert!(matches!(second, Err(PoolError::Timeout)));
    }

    #[test]
    fn expired_slot_is_reallocated_not_handed_out() {
        let config = PoolConfig::new(
            1,
            CountingAllocator {
                next: AtomicU32::new(0),
            },
        )
        .with_expiration(TimeExpiration::new(Duration::from_millis(1)).unwrap());
        let pool = Pool::new(config).unwrap();

        assert!(wait_until(|| pool.alloc_count() >= 1, Duration::from_secs(1)));
        std::thread::sleep(Duration::from_millis(20));

        let claimed = pool
            .claim(Timeout::from(Duration::from_millis(500)))
            .expect("a fresh slot should be reallocated after the old one expires");
        drop(claimed);
        assert!(pool.alloc_count() >= 2);
    }

    #[test]
    fn shutdown_drains_and_completes() {
        let config = PoolConfig::new(
            2,
            CountingAllocator {
                next: AtomicU32::new(0),
            },
        );
        let pool = Pool::new(config).unwrap();
        assert!(wait_until(|| pool.alloc_count() >= 2, Duration::from_secs(1)));

        let completion = pool.shutdown();
        assert!(completion.await_timeout(Duration::from_secs(1)));
        assert_eq!(pool.size(), 0, "every slot should be tombstoned by shutdown");

        let after_shutdown = pool.claim(Timeout::from(Duration::from_millis(10)));
        assert!(matches!(after_shutdown, Err(PoolError::PoolClosed)));
    }

    #[test]
    fn set_target_size_rejects_zero() {
        let config = PoolConfig::new(
            1,
            CountingAllocator {
                next: AtomicU32::new(0),
            },
        );
        let pool = Pool::new(config).unwrap();
        assert!(pool.set_target_size(0).is_err());
    }
}
