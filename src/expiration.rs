// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Policies deciding when a live slot's object should be torn down and
//! rebuilt rather than handed to the next claimer.

use std::time::Duration;

use crate::error::{PoolError, PoolResult};
use crate::slot::SlotInfo;

/// Decides whether a slot's current object has expired.
///
/// Checked both when a slot is about to be claimed and during the
/// background expiration sweep; either path marks an expired slot DEAD and
/// routes it to the allocator worker for a fresh incarnation.
pub trait Expiration<T>: Send + Sync {
    fn has_expired(&self, info: &SlotInfo<'_, T>) -> bool;
}

/// Expires an object once it has been alive for at least `ttl`.
///
/// Boundary semantics: an age exactly equal to `ttl` is *not* expired, only
/// an age strictly greater than `ttl` is. A `ttl` of [`Duration::MAX`]
/// never expires.
pub struct TimeExpiration {
    ttl: Duration,
}

impl TimeExpiration {
    /// # Errors
    /// Returns [`PoolError::IllegalArgument`] if `ttl` is below 1 millisecond
    /// — a TTL that rounds to zero would expire every slot immediately,
    /// which is never what a caller means by "time-based expiration".
    pub fn new(ttl: Duration) -> PoolResult<Self> {
        if ttl < Duration::from_millis(1) {
            return Err(PoolError::illegal_argument(format!(
                "TTL must be at least 1ms, got {ttl:?}"
            )));
        }
        Ok(Self { ttl })
    }

    /// An expiration policy that never expires anything.
    pub fn never() -> Self {
        Self { ttl: Duration::MAX }
    }
}

impl<T> Expiration<T> for TimeExpiration {
    fn has_expired(&self, info: &SlotInfo<'_, T>) -> bool {
        if self.ttl == Duration::MAX {
            return false;
        }
        info.age_millis() > self.ttl.as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slot::Slot;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn age_equal_to_ttl_is_not_expired() {
        let policy = TimeExpiration::new(Duration::from_millis(100)).unwrap();
        let slot: Slot<u32> = Slot::new_dead(1);
        slot.publish(0, 0);
        let info = slot.info(100);
        assert!(!policy.has_expired(&info));
    }

    #[test]
    fn age_past_ttl_is_expired() {
        let policy = TimeExpiration::new(Duration::from_millis(100)).unwrap();
        let slot: Slot<u32> = Slot::new_dead(1);
        slot.publish(0, 0);
        let info = slot.info(101);
        assert!(policy.has_expired(&info));
    }

    #[test]
    fn zero_ttl_is_rejected() {
        assert!(matches!(
            TimeExpiration::new(Duration::ZERO),
            Err(PoolError::IllegalArgument(_))
        ));
    }

    #[test]
    fn sub_millisecond_ttl_is_rejected() {
        assert!(matches!(
            TimeExpiration::new(Duration::from_micros(500)),
            Err(PoolError::IllegalArgument(_))
        ));
    }

    #[test]
    fn never_expiration_is_never_expired() {
        let policy = TimeExpiration::never();
        let slot: Slot<u32> = Slot::new_dead(1);
        slot.publish(0, 0);
        let info = slot.info(u64::MAX / 2);
        assert!(!policy.has_expired(&info));
    }

    /// A test fixture that expires a slot on the Nth check, used by
    /// integration tests to deterministically drive slots through
    /// expiration without waiting on real time.
    ///
    /// Indexes into `replies` with the claim count, clamped to the last
    /// entry once claims outrun the table — clamping with `min`, not `max`,
    /// since a `max` here would walk the index *away* from the last entry
    /// once `claim_count` exceeds `replies.len()`.
    pub struct CountingExpiration {
        replies: Vec<bool>,
        counter: AtomicUsize,
    }

    impl CountingExpiration {
        pub fn new(replies: Vec<bool>) -> Self {
            assert!(!replies.is_empty(), "replies must not be empty");
            Self {
                replies,
                counter: AtomicUsize::new(0),
            }
        }
    }

    impl<T> Expiration<T> for CountingExpiration {
        fn has_expired(&self, _info: &SlotInfo<'_, T>) -> bool {
            let idx = self.counter.fetch_add(1, Ordering::SeqCst);
            self.replies[idx.min(self.replies.len() - 1)]
        }
    }

    #[test]
    fn counting_expiration_clamps_to_last_reply() {
        let policy = CountingExpiration::new(vec![false, true]);
        let slot: Slot<u32> = Slot::new_dead(1);
        slot.publish(0, 0);
        let info = slot.info(0);
        assert!(!policy.has_expired(&info));
        assert!(policy.has_expired(&info));
        // Past the table's end: clamps to the last (`true`) reply forever.
        assert!(policy.has_expired(&info));
        assert!(policy.has_expired(&info));
    }
}
