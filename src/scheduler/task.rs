// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The work items the background scheduler carries, and the lock-free stack
//! used to hand them to the controller thread.
//!
//! The stack always holds at least one node: a `Bootstrap` sentinel. A push
//! that displaces the sentinel tells the pusher "the controller thread is
//! (or may be) parked with nothing to do" — the pusher is then responsible
//! for waking it inline, rather than trusting the controller to notice on
//! its own. This avoids a missed-wakeup window between the controller
//! observing an empty stack and it actually going to sleep.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::queue::TreiberStack;

/// A unit of background work.
pub enum Task {
    /// Run once, as soon as a worker is free.
    Immediate(Box<dyn FnOnce() + Send>),
    /// Run repeatedly on a fixed delay until cancelled.
    Scheduled {
        work: Arc<dyn Fn() + Send + Sync>,
        delay: Duration,
        next_fire_at_nanos: AtomicU64,
        cancelled: Arc<AtomicBool>,
    },
    /// Placeholder occupying the bottom of the stack when there is no real
    /// work queued; never executed.
    Bootstrap,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Immediate(_) => write!(f, "Task::Immediate"),
            Self::Scheduled { delay, .. } => write!(f, "Task::Scheduled(delay={delay:?})"),
            Self::Bootstrap => write!(f, "Task::Bootstrap"),
        }
    }
}

/// Handle to a cancellable scheduled task.
#[derive(Clone)]
pub struct ScheduledHandle {
    cancelled: Arc<AtomicBool>,
}

impl ScheduledHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Lock-free LIFO of pending [`Task`]s, bootstrapped with a sentinel.
pub struct TaskStack {
    stack: TreiberStack<Task>,
}

impl TaskStack {
    pub fn new() -> Self {
        let stack = TreiberStack::new();
        stack.push(Task::Bootstrap);
        Self { stack }
    }

    /// Push a task onto the stack.
    ///
    /// Returns `true` if this push displaced the bootstrap sentinel, meaning
    /// the caller must make sure a controller thread is running and awake to
    /// pick the new work up.
    pub fn push(&self, task: Task) -> bool {
        self.stack
            .push_and_inspect_displaced(task, |displaced| matches!(displaced, Some(Task::Bootstrap)))
    }

    /// Schedule a cancellable repeating task and report whether the push
    /// woke the controller (see [`Self::push`]).
    pub fn push_scheduled(
        &self,
        delay: Duration,
        now_nanos: u64,
        work: Arc<dyn Fn() + Send + Sync>,
    ) -> (ScheduledHandle, bool) {
        let cancelled = Arc::new(AtomicBool::new(false));
        let handle = ScheduledHandle {
            cancelled: Arc::clone(&cancelled),
        };
        let task = Task::Scheduled {
            work,
            delay,
            next_fire_at_nanos: AtomicU64::new(now_nanos + delay.as_nanos() as u64),
            cancelled,
        };
        let woke = self.push(task);
        (handle, woke)
    }

    /// Atomically take every queued task (the sentinel is filtered out and
    /// reinstalled), leaving the stack empty but bootstrapped.
    pub fn take_all(&self) -> Vec<Task> {
        self.stack
            .take_all(Some(Task::Bootstrap))
            .into_iter()
            .filter(|task| !matches!(task, Task::Bootstrap))
            .collect()
    }
}

impl Default for TaskStack {
    fn default() -> Self {
        Self::new()
    }
}
