// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bounded hand-off queue of live, unclaimed slots.
//!
//! Uses the same two-tier idiom as this codebase's wake notifiers: a
//! lock-free bounded queue for the fast path, with a condition variable as
//! the fallback for claimers that need to block.

use std::time::{Duration, Instant};

use crossbeam::queue::ArrayQueue;
use parking_lot::{Condvar, Mutex};

/// A bounded, blocking hand-off buffer of slots ready to be claimed.
pub struct LiveQueue<T> {
    queue: ArrayQueue<T>,
    lock: Mutex<()>,
    condvar: Condvar,
}

impl<T> LiveQueue<T> {
    /// Create a queue with room for `capacity` slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            lock: Mutex::new(()),
            condvar: Condvar::new(),
        }
    }

    /// The maximum number of slots this queue can hold without blocking a push.
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Push a slot. Never blocks. Capacity is reserved by the pool at slot
    /// creation time, so a full queue here indicates a capacity-bookkeeping
    /// bug upstream rather than a transient condition.
    pub fn push(&self, item: T) {
        if let Err(_rejected) = self.queue.push(item) {
            log::error!(
                "live queue is at capacity ({}): dropping a push, this indicates a \
                 target_size/capacity bookkeeping bug",
                self.queue.capacity()
            );
        }
        // Hold the lock across notify so a waiter that is about to sleep
        // cannot miss this wakeup (the classic condvar lost-wakeup guard).
        let _guard = self.lock.lock();
        self.condvar.notify_one();
    }

    /// Block up to `timeout` for a slot to become available.
    pub fn claim(&self, timeout: Duration) -> Option<T> {
        if let Some(item) = self.queue.pop() {
            return Some(item);
        }

        let deadline = Instant::now() + timeout;
        loop {
            let mut guard = self.lock.lock();
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let remaining = deadline - now;

            // Re-check under the lock in case a push raced us to the lock
            // between the first pop attempt and acquiring it.
            if let Some(item) = self.queue.pop() {
                return Some(item);
            }

            let timed_out = self.condvar.wait_for(&mut guard, remaining).timed_out();
            drop(guard);

            if let Some(item) = self.queue.pop() {
                return Some(item);
            }
            if timed_out {
                return None;
            }
            // Spurious wakeup with nothing to claim yet: loop and re-check
            // the deadline.
        }
    }

    /// Drain every slot currently queued, without blocking.
    pub fn drain(&self) -> Vec<T> {
        let mut drained = Vec::new();
        while let Some(item) = self.queue.pop() {
            drained.push(item);
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
