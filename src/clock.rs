// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Coarse asynchronous monotonic clock, plus a precise synchronous fallback.
//!
//! The asynchronous clock trades precision (±10 ms) for O(1), lock-free reads
//! on the hot claim path: a dedicated background thread samples
//! [`Instant::now`] every ~10 ms and publishes it through a single atomic.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const SAMPLE_INTERVAL: Duration = Duration::from_millis(10);

/// A monotonic time source. `now_millis`/`now_nanos` never move backward
/// across successive calls from any thread.
pub trait MonotonicTimeSource: Send + Sync {
    /// Coarse current time, in milliseconds since this clock was created.
    fn now_millis(&self) -> u64;

    /// Precise current time, in nanoseconds since this clock was created.
    fn now_nanos(&self) -> u64;
}

/// Asynchronous clock: a keeper thread refreshes an atomic every ~10 ms.
///
/// Readers never block and never touch the precise time source directly,
/// which keeps `claim`'s expiration check to a single relaxed load.
pub struct AsyncClock {
    epoch: Instant,
    millis: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
    keeper: Option<thread::JoinHandle<()>>,
}

impl AsyncClock {
    /// Spawn the clock-keeper thread and start sampling immediately.
    pub fn start() -> Self {
        let epoch = Instant::now();
        let millis = Arc::new(AtomicU64::new(0));
        let stop = Arc::new(AtomicBool::new(false));

        let keeper_millis = Arc::clone(&millis);
        let keeper_stop = Arc::clone(&stop);
        let keeper = thread::Builder::new()
            .name("stormpot-clock".into())
            .spawn(move || Self::run(epoch, keeper_millis, keeper_stop))
            .expect("failed to spawn stormpot-clock thread");

        Self {
            epoch,
            millis,
            stop,
            keeper: Some(keeper),
        }
    }

    fn run(epoch: Instant, millis: Arc<AtomicU64>, stop: Arc<AtomicBool>) {
        while !stop.load(Ordering::Relaxed) {
            let elapsed = epoch.elapsed().as_millis() as u64;
            millis.store(elapsed, Ordering::Relaxed);
            thread::sleep(SAMPLE_INTERVAL);
        }
        // Final sample so the last observed value reflects the moment of stop.
        millis.store(epoch.elapsed().as_millis() as u64, Ordering::Relaxed);
    }

    /// Signal the keeper thread to stop and join it.
    ///
    /// Absorbs a panicked keeper thread by logging; the clock simply retains
    /// its last observed value after that.
    pub fn stop_and_join(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.keeper.take() {
            if handle.join().is_err() {
                log::error!("stormpot-clock thread panicked during shutdown");
            }
        }
    }
}

impl Drop for AsyncClock {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

impl MonotonicTimeSource for AsyncClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::Relaxed)
    }

    fn now_nanos(&self) -> u64 {
        // Synchronous fallback for the finer-grained reads the controller
        // needs (scheduled-task deadlines); the keeper thread only maintains
        // millisecond granularity.
        self.epoch.elapsed().as_nanos() as u64
    }
}

/// Synchronous clock: always reads the precise time source directly.
///
/// Used where finer resolution matters more than a lock-free hot path, e.g.
/// final deadline checks in `Completion::await_timeout`.
pub struct SyncClock {
    epoch: Instant,
}

impl SyncClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for SyncClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicTimeSource for SyncClock {
    fn now_millis(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn now_nanos(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }
}
