// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The background scheduler's single controller thread, and the on-demand
//! worker pool it dispatches onto.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};

use crate::clock::MonotonicTimeSource;
use crate::error::PoolError;

use super::task::{Task, TaskStack};

const MAX_PARK: Duration = Duration::from_secs(60);
const WORKER_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

type Job = Box<dyn FnOnce() + Send>;

/// Two-tier wakeup: an atomic fast path, falling back to a parked condvar
/// wait. Mirrors the wake-notifier idiom used elsewhere in this codebase so
/// a `push` racing with the controller about to park can never be missed.
struct ControllerWaker {
    ready: AtomicBool,
    sleeping: Mutex<bool>,
    condvar: Condvar,
}

impl ControllerWaker {
    fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
            sleeping: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    fn notify(&self) {
        self.ready.store(true, Ordering::Release);
        let mut sleeping = self.sleeping.lock();
        if *sleeping {
            *sleeping = false;
            self.condvar.notify_one();
        }
    }

    /// Park for up to `timeout` unless already woken since the last wait.
    fn wait_timeout(&self, timeout: Duration) {
        if self.ready.swap(false, Ordering::AcqRel) {
            return;
        }
        let mut sleeping = self.sleeping.lock();
        *sleeping = true;
        self.condvar.wait_for(&mut sleeping, timeout);
        *sleeping = false;
        self.ready.store(false, Ordering::Release);
    }
}

/// A pool of worker threads spawned on demand, up to `max_threads`. A worker
/// that sits idle for [`WORKER_IDLE_TIMEOUT`] retires itself.
pub struct WorkerPool {
    sender: Sender<Job>,
    receiver: Receiver<Job>,
    alive: Arc<AtomicUsize>,
    max_threads: usize,
}

impl WorkerPool {
    pub fn new(max_threads: usize) -> Self {
        let (sender, receiver) = channel::unbounded();
        Self {
            sender,
            receiver,
            alive: Arc::new(AtomicUsize::new(0)),
            max_threads: max_threads.max(1),
        }
    }

    /// Queue a job, spawning a new worker if there is spare capacity.
    pub fn dispatch(&self, job: Job) {
        self.maybe_spawn_worker();
        // The receiver is kept alive by this struct, so send never fails.
        let _ = self.sender.send(job);
    }

    pub fn alive_count(&self) -> usize {
        self.alive.load(Ordering::Acquire)
    }

    fn maybe_spawn_worker(&self) {
        loop {
            let current = self.alive.load(Ordering::Acquire);
            if current >= self.max_threads {
                return;
            }
            if self
                .alive
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                let receiver = self.receiver.clone();
                let alive = Arc::clone(&self.alive);
                let spawned = thread::Builder::new()
                    .name("stormpot-worker".into())
                    .spawn(move || Self::worker_loop(receiver, alive));
                if spawned.is_err() {
                    log::error!("failed to spawn stormpot-worker thread");
                    self.alive.fetch_sub(1, Ordering::AcqRel);
                }
                return;
            }
        }
    }

    fn worker_loop(receiver: Receiver<Job>, alive: Arc<AtomicUsize>) {
        loop {
            match receiver.recv_timeout(WORKER_IDLE_TIMEOUT) {
                Ok(job) => job(),
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        alive.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A scheduled task waiting in the controller's timer heap.
struct ScheduledEntry {
    fire_at_nanos: u64,
    delay: Duration,
    work: Arc<dyn Fn() + Send + Sync>,
    cancelled: Arc<AtomicBool>,
}

impl PartialEq for ScheduledEntry {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at_nanos == other.fire_at_nanos
    }
}
impl Eq for ScheduledEntry {}
impl PartialOrd for ScheduledEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for ScheduledEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.fire_at_nanos.cmp(&other.fire_at_nanos)
    }
}

/// Drives the task stack: dispatches immediate work, fires due scheduled
/// work from a min-heap keyed on fire time, and parks in between.
pub struct ProcessController {
    stop: Arc<AtomicBool>,
    waker: Arc<ControllerWaker>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ProcessController {
    pub fn spawn(
        task_stack: Arc<TaskStack>,
        pool: Arc<WorkerPool>,
        clock: Arc<dyn MonotonicTimeSource>,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let waker = Arc::new(ControllerWaker::new());
        let loop_stop = Arc::clone(&stop);
        let loop_waker = Arc::clone(&waker);

        let handle = thread::Builder::new()
            .name("stormpot-controller".into())
            .spawn(move || Self::run(task_stack, pool, clock, loop_stop, loop_waker))
            .expect("failed to spawn stormpot-controller thread");

        Self {
            stop,
            waker,
            handle: Some(handle),
        }
    }

    fn run(
        task_stack: Arc<TaskStack>,
        pool: Arc<WorkerPool>,
        clock: Arc<dyn MonotonicTimeSource>,
        stop: Arc<AtomicBool>,
        waker: Arc<ControllerWaker>,
    ) {
        let mut scheduled: BinaryHeap<Reverse<ScheduledEntry>> = BinaryHeap::new();

        while !stop.load(Ordering::Relaxed) {
            Self::absorb_new_tasks(&task_stack, &pool, &mut scheduled);
            let now = clock.now_nanos();
            Self::fire_due(&pool, &mut scheduled, now);

            let park_for = scheduled
                .peek()
                .map(|Reverse(e)| Duration::from_nanos(e.fire_at_nanos.saturating_sub(now)))
                .unwrap_or(MAX_PARK)
                .min(MAX_PARK);
            waker.wait_timeout(park_for);
        }

        // Final sweep so work submitted right before shutdown is not lost.
        Self::absorb_new_tasks(&task_stack, &pool, &mut scheduled);
    }

    fn absorb_new_tasks(
        task_stack: &TaskStack,
        pool: &WorkerPool,
        scheduled: &mut BinaryHeap<Reverse<ScheduledEntry>>,
    ) {
        for task in task_stack.take_all() {
            match task {
                Task::Immediate(job) => pool.dispatch(job),
                Task::Scheduled {
                    work,
                    delay,
                    next_fire_at_nanos,
                    cancelled,
                } => {
                    scheduled.push(Reverse(ScheduledEntry {
                        fire_at_nanos: next_fire_at_nanos.load(Ordering::Acquire),
                        delay,
                        work,
                        cancelled,
                    }));
                }
                Task::Bootstrap => {}
            }
        }
    }

    fn fire_due(pool: &WorkerPool, scheduled: &mut BinaryHeap<Reverse<ScheduledEntry>>, now: u64) {
        while let Some(Reverse(entry)) = scheduled.peek() {
            if entry.fire_at_nanos > now {
                break;
            }
            let Reverse(entry) = scheduled.pop().expect("peeked entry must pop");
            if entry.cancelled.load(Ordering::Acquire) {
                continue;
            }
            let work = Arc::clone(&entry.work);
            pool.dispatch(Box::new(move || work()));
            scheduled.push(Reverse(ScheduledEntry {
                fire_at_nanos: now + entry.delay.as_nanos() as u64,
                delay: entry.delay,
                work: entry.work,
                cancelled: entry.cancelled,
            }));
        }
    }

    /// Wake the controller immediately, e.g. after pushing new work.
    pub fn wake(&self) {
        self.waker.notify();
    }

    /// Signal the controller to stop and join its thread.
    ///
    /// Absorbs one panicked join by logging; there is only ever one
    /// controller thread per scheduler instance, so a second failure cannot
    /// occur here — any such bug would surface as a double-join panic, which
    /// we intentionally do not guard against.
    pub fn stop_and_join(&mut self) -> Result<(), PoolError> {
        self.stop.store(true, Ordering::Relaxed);
        self.waker.notify();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("stormpot-controller thread panicked during shutdown");
                return Err(PoolError::illegal_state(
                    "background scheduler controller thread panicked",
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;

    #[test]
    fn worker_pool_dispatches_jobs() {
        let pool = WorkerPool::new(2);
        let results = Arc::new(StdMutex::new(Vec::new()));
        for i in 0..5 {
            let results = Arc::clone(&results);
            pool.dispatch(Box::new(move || {
                results.lock().unwrap().push(i);
            }));
        }
        thread::sleep(Duration::from_millis(100));
        assert_eq!(results.lock().unwrap().len(), 5);
    }

    #[test]
    fn worker_pool_caps_thread_count() {
        let pool = WorkerPool::new(2);
        let barrier_count = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let barrier_count = Arc::clone(&barrier_count);
            pool.dispatch(Box::new(move || {
                barrier_count.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(20));
            }));
        }
        thread::sleep(Duration::from_millis(50));
        assert!(pool.alive_count() <= 2);
    }

    #[test]
    fn controller_waker_wakes_promptly() {
        let waker = Arc::new(ControllerWaker::new());
        let w2 = Arc::clone(&waker);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            w2.notify();
        });
        let start = std::time::Instant::now();
        waker.wait_timeout(Duration::from_secs(5));
        assert!(start.elapsed() < Duration::from_millis(500));
        handle.join().unwrap();
    }
}
