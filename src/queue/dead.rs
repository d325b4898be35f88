// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Lock-free routing queue for slots awaiting (re)allocation or deallocation.
//!
//! Specializes [`TreiberStack`] to carry `Arc<Slot<T>>` handles instead of
//! closures; it reuses the identical CAS push/pop discipline, just under
//! domain-specific method names.

use std::sync::Arc;

use super::treiber::TreiberStack;
use crate::slot::Slot;

/// Unordered, lock-free collection of dead slots waiting on the allocator
/// worker. LIFO order is irrelevant here (any dead slot is as good as any
/// other to reallocate); a Treiber stack is simply the cheapest lock-free
/// structure available, so we reuse it rather than invent a queue.
pub struct DeadQueue<T> {
    stack: TreiberStack<Arc<Slot<T>>>,
}

impl<T> DeadQueue<T> {
    pub fn new() -> Self {
        Self {
            stack: TreiberStack::new(),
        }
    }

    /// Hand a dead slot to the allocator worker.
    pub fn push(&self, slot: Arc<Slot<T>>) {
        self.stack.push(slot);
    }

    /// Take the next dead slot, if any.
    pub fn pop(&self) -> Option<Arc<Slot<T>>> {
        self.stack.pop()
    }

    /// Drain every currently-queued dead slot, e.g. during shutdown.
    pub fn drain(&self) -> Vec<Arc<Slot<T>>> {
        self.stack.take_all(None)
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }
}

impl<T> Default for DeadQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
