// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The slot state machine: one slot per pooled object, owned by the pool for
//! its entire lifetime.
//!
//! ```text
//!           allocator publishes
//! DEAD ──────────────────────────▶ LIVE
//!  ▲                                │
//!  │ release-as-dead, or            │ claim succeeds
//!  │ expiration detected            ▼
//!  └───────────── CLAIMED ◀─────────┘
//!                   │
//!                   │ release-as-live
//!                   ▼
//!                  LIVE (back in the live queue)
//!
//! any state ─── shutdown deallocation ──▶ TOMBSTONE
//! ```

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;

use crate::error::PoolError;

/// The slot's position in its state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SlotState {
    /// Holds a valid user object, sitting in the live queue awaiting a claimer.
    Live = 0,
    /// Holds a valid user object, owned exclusively by one claimer.
    Claimed = 1,
    /// Holds no valid user object; queued for (re)allocation or deallocation.
    Dead = 2,
    /// Terminal: deallocated during shutdown, never re-enters any queue.
    Tombstone = 3,
}

impl SlotState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Live,
            1 => Self::Claimed,
            2 => Self::Dead,
            3 => Self::Tombstone,
            _ => unreachable!("invalid slot state byte {v}"),
        }
    }
}

/// Read-only view of a slot's metadata, handed to [`crate::expiration::Expiration`].
pub struct SlotInfo<'a, T> {
    slot: &'a Slot<T>,
    now_millis: u64,
}

impl<'a, T> SlotInfo<'a, T> {
    pub(crate) fn new(slot: &'a Slot<T>, now_millis: u64) -> Self {
        Self { slot, now_millis }
    }

    /// How long, in milliseconds, since this slot's user object was (re)built.
    pub fn age_millis(&self) -> u64 {
        self.now_millis
            .saturating_sub(self.slot.created_at_millis.load(Ordering::Acquire))
    }

    /// Number of successful claims against the current incarnation.
    pub fn claim_count(&self) -> u64 {
        self.slot.claim_count.load(Ordering::Acquire)
    }

    /// The slot's current user object, if it has one.
    ///
    /// `None` for a slot's very first allocation — `Pool::replenish` builds
    /// a `SlotInfo` from a still-DEAD, unpublished slot before calling
    /// [`crate::allocator::Allocator::allocate`], so an allocator inspecting
    /// its *previous* incarnation sees no payload rather than a panic.
    pub fn poolable(&self) -> Option<&T> {
        // SAFETY: SlotInfo never outlives the slot it borrows, and no other
        // writer touches the payload while a SlotInfo exists: the allocator
        // worker holds the slot DEAD-and-unpublished, or the pool holds it
        // LIVE/CLAIMED, for the info's entire lifetime.
        unsafe { &*self.slot.poolable.get() }.as_ref()
    }
}

/// One pooled object, tracked through its lifetime by the pool.
pub struct Slot<T> {
    state: AtomicU8,
    poolable: UnsafeCell<Option<T>>,
    created_at_millis: AtomicU64,
    claim_count: AtomicU64,
    /// Identifier of the pool that created this slot, used only for
    /// diagnostic logs and debug assertions.
    pub owner: u64,
    /// A recorded allocator failure, set by the allocator worker when
    /// `allocate` errors; taken and surfaced by the next claimer.
    poisoned: Mutex<Option<PoolError>>,
}

// SAFETY: all mutable access to `poolable` is gated by `state` transitions
// that guarantee exclusive ownership (only the allocator worker writes while
// DEAD-and-not-yet-published; only the claimer reads/writes while CLAIMED).
unsafe impl<T: Send> Send for Slot<T> {}
unsafe impl<T: Send> Sync for Slot<T> {}

impl<T> Slot<T> {
    /// Create a brand-new slot in the DEAD state, awaiting its first allocation.
    pub fn new_dead(owner: u64) -> Self {
        Self {
            state: AtomicU8::new(SlotState::Dead as u8),
            poolable: UnsafeCell::new(None),
            created_at_millis: AtomicU64::new(0),
            claim_count: AtomicU64::new(0),
            owner,
            poisoned: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SlotState {
        SlotState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: SlotState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Called by an allocator worker to publish a freshly built object.
    /// The slot must currently be DEAD and not reachable from any queue.
    pub fn publish(&self, object: T, now_millis: u64) {
        debug_assert_eq!(self.state(), SlotState::Dead);
        // SAFETY: only the allocator worker touches the payload while DEAD
        // and unpublished.
        unsafe {
            *self.poolable.get() = Some(object);
        }
        self.created_at_millis.store(now_millis, Ordering::Release);
        self.claim_count.store(0, Ordering::Release);
        self.set_state(SlotState::Live);
    }

    /// Called by the pool facade when a claim pops this slot off the live
    /// queue. Must be paired with a prior LIVE state.
    pub fn mark_claimed(&self) {
        debug_assert_eq!(self.state(), SlotState::Live);
        self.set_state(SlotState::Claimed);
        self.claim_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Release back to LIVE (object kept).
    pub fn mark_live(&self) {
        debug_assert_eq!(self.state(), SlotState::Claimed);
        self.set_state(SlotState::Live);
    }

    /// Release to DEAD (object will be deallocated and replaced).
    pub fn mark_dead(&self) {
        debug_assert!(matches!(
            self.state(),
            SlotState::Claimed | SlotState::Live | SlotState::Dead
        ));
        self.set_state(SlotState::Dead);
    }

    /// Take the current user object out of the slot, if any, leaving it empty.
    /// Used by the allocator worker before re-allocating, and during
    /// shutdown before tombstoning.
    pub fn take_poolable(&self) -> Option<T> {
        // SAFETY: only called while the slot is DEAD (no concurrent claimer).
        unsafe { (*self.poolable.get()).take() }
    }

    pub fn tombstone(&self) {
        self.set_state(SlotState::Tombstone);
    }

    pub fn created_at_millis(&self) -> u64 {
        self.created_at_millis.load(Ordering::Acquire)
    }

    pub fn claim_count(&self) -> u64 {
        self.claim_count.load(Ordering::Acquire)
    }

    /// Record an allocation failure for the next claimer to observe.
    pub fn poison(&self, err: PoolError) {
        *self.poisoned.lock().expect("poisoned mutex lock") = Some(err);
    }

    /// Take and clear any recorded allocation failure.
    pub fn take_poison(&self) -> Option<PoolError> {
        self.poisoned.lock().expect("poisoned mutex lock").take()
    }

    pub fn info(&self, now_millis: u64) -> SlotInfo<'_, T> {
        SlotInfo::new(self, now_millis)
    }

    /// # Safety
    /// Caller must ensure the slot is currently CLAIMED and that no other
    /// reference to the payload is alive.
    pub unsafe fn poolable_mut(&self) -> &mut T {
        (*self.poolable.get())
            .as_mut()
            .expect("claimed slot missing poolable")
    }

    /// # Safety
    /// Caller must ensure the slot is currently CLAIMED.
    pub unsafe fn poolable_ref(&self) -> &T {
        (*self.poolable.get())
            .as_ref()
            .expect("claimed slot missing poolable")
    }
}
