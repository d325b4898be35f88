// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The process-wide background scheduler: a shared controller thread and
//! worker pool that every [`crate::pool::Pool`] submits allocation and
//! expiration-sweep work to, unless given a dedicated instance.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use arc_swap::ArcSwap;

use crate::clock::{AsyncClock, MonotonicTimeSource};
use crate::config::SchedulerConfig;

use super::controller::{ProcessController, WorkerPool};
use super::task::{ScheduledHandle, Task, TaskStack};

static DEFAULT_INSTANCE: OnceLock<ArcSwap<BackgroundScheduler>> = OnceLock::new();
static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

/// The clock-keeper and controller threads, alive only while at least one
/// lease is held.
struct Runtime {
    clock: Arc<AsyncClock>,
    controller: ProcessController,
}

/// A process-wide (or pool-private) home for background allocation,
/// deallocation, and expiration-sweep work.
///
/// Pools don't own threads directly; they [`BackgroundScheduler::acquire`] a
/// lease on a scheduler and submit work through it. Multiple pools typically
/// share the process [`BackgroundScheduler::default_instance`], keeping the
/// total thread count bounded regardless of how many pools an application
/// creates.
///
/// The clock-keeper and controller threads are not running unconditionally:
/// the first lease taken out starts them, and the last one dropped stops and
/// joins them. A scheduler with no current lease holders owns no threads at
/// all, and starts fresh ones if leased again later.
pub struct BackgroundScheduler {
    id: u64,
    task_stack: Arc<TaskStack>,
    worker_pool: Arc<WorkerPool>,
    runtime: Mutex<Option<Runtime>>,
    active_leases: AtomicUsize,
}

impl BackgroundScheduler {
    /// Build a new scheduler. Its controller and clock-keeper threads are
    /// not started until the first [`Self::acquire`]. Most applications
    /// should use [`Self::default_instance`] instead.
    pub fn new(config: SchedulerConfig) -> Arc<Self> {
        let id = NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed);
        Arc::new(Self {
            id,
            task_stack: Arc::new(TaskStack::new()),
            worker_pool: Arc::new(WorkerPool::new(config.max_threads)),
            runtime: Mutex::new(None),
            active_leases: AtomicUsize::new(0),
        })
    }

    /// The shared, lazily-started, process-wide scheduler.
    pub fn default_instance() -> Arc<Self> {
        let cell = DEFAULT_INSTANCE.get_or_init(|| ArcSwap::new(Self::new(SchedulerConfig::default())));
        cell.load_full()
    }

    /// Replace the process-wide default instance, e.g. in tests that need a
    /// scheduler with deterministic sizing. Existing lease holders keep
    /// using their original instance; only future calls to
    /// [`Self::default_instance`] observe the replacement.
    pub fn set_default_instance(scheduler: Arc<Self>) {
        if let Some(cell) = DEFAULT_INSTANCE.get() {
            cell.store(scheduler);
        } else {
            let _ = DEFAULT_INSTANCE.set(ArcSwap::new(scheduler));
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// A shared handle to this scheduler's clock.
    ///
    /// Only meaningful while a lease is held — callers acquire a lease
    /// before asking for the clock, the same way [`crate::pool::Pool::new`]
    /// does.
    ///
    /// # Panics
    /// Panics if no lease is currently held, since there is then no clock
    /// running to hand out.
    pub fn clock(&self) -> Arc<dyn MonotonicTimeSource> {
        let guard = self.runtime.lock().expect("runtime mutex poisoned");
        guard
            .as_ref()
            .map(|runtime| Arc::clone(&runtime.clock) as Arc<dyn MonotonicTimeSource>)
            .expect("clock requested from a scheduler with no active lease")
    }

    /// Take out a lease, keeping the scheduler accounted-for as "in use" for
    /// as long as the returned guard lives.
    ///
    /// The first lease taken out (0 -> 1 active leases) starts the
    /// clock-keeper and controller threads; the last one dropped (1 -> 0)
    /// stops and joins them.
    pub fn acquire(self: &Arc<Self>) -> SchedulerLease {
        let previous = self.active_leases.fetch_add(1, Ordering::AcqRel);
        if previous == 0 {
            self.start_runtime();
        }
        SchedulerLease {
            scheduler: Arc::clone(self),
        }
    }

    pub fn active_leases(&self) -> usize {
        self.active_leases.load(Ordering::Acquire)
    }

    fn start_runtime(&self) {
        let mut guard = self.runtime.lock().expect("runtime mutex poisoned");
        if guard.is_some() {
            return;
        }
        let clock = Arc::new(AsyncClock::start());
        let clock_for_controller: Arc<dyn MonotonicTimeSource> = Arc::clone(&clock) as Arc<dyn MonotonicTimeSource>;
        let controller = ProcessController::spawn(
            Arc::clone(&self.task_stack),
            Arc::clone(&self.worker_pool),
            clock_for_controller,
        );
        *guard = Some(Runtime { clock, controller });
    }

    fn stop_runtime(&self) {
        let mut guard = self.runtime.lock().expect("runtime mutex poisoned");
        if let Some(mut runtime) = guard.take() {
            if let Err(err) = runtime.controller.stop_and_join() {
                log::error!("background scheduler {} failed to stop cleanly: {err}", self.id);
            }
            // `runtime.clock` drops here too, joining the clock-keeper thread.
        }
    }

    /// Submit a fire-and-forget job.
    pub fn submit_immediate(&self, job: impl FnOnce() + Send + 'static) {
        let woke = self.task_stack.push(Task::Immediate(Box::new(job)));
        if woke {
            self.with_controller(|c| c.wake());
        }
    }

    /// Submit a repeating job, first firing after `delay` and then every
    /// `delay` thereafter until the returned handle is cancelled or dropped
    /// implicitly (cancellation is explicit; dropping the handle alone does
    /// not stop the task, matching the spec's "fire and forget unless
    /// cancelled" semantics).
    pub fn submit_scheduled(
        &self,
        delay: Duration,
        job: impl Fn() + Send + Sync + 'static,
    ) -> ScheduledHandle {
        let now = self.now_nanos();
        let (handle, woke) = self.task_stack.push_scheduled(delay, now, Arc::new(job));
        if woke {
            self.with_controller(|c| c.wake());
        }
        handle
    }

    fn now_nanos(&self) -> u64 {
        let guard = self.runtime.lock().expect("runtime mutex poisoned");
        guard.as_ref().map(|r| r.clock.now_nanos()).unwrap_or(0)
    }

    fn with_controller(&self, f: impl FnOnce(&ProcessController)) {
        let guard = self.runtime.lock().expect("runtime mutex poisoned");
        if let Some(runtime) = guard.as_ref() {
            f(&runtime.controller);
        }
    }
}

/// Keeps a [`BackgroundScheduler`] accounted-for as "in use" by a pool.
pub struct SchedulerLease {
    scheduler: Arc<BackgroundScheduler>,
}

impl SchedulerLease {
    pub fn scheduler(&self) -> &Arc<BackgroundScheduler> {
        &self.scheduler
    }
}

impl Drop for SchedulerLease {
    fn drop(&mut self) {
        let previous = self.scheduler.active_leases.fetch_sub(1, Ordering::AcqRel);
        if previous == 1 {
            self.scheduler.stop_runtime();
        }
    }
}
