// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Host threads standing in for the timer, watchdog and work queue peripherals.
// Author: Lukas Bower

//! Host peripherals backed by std threads.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, warn};
use spin::Mutex;

use crate::error::WatchdogError;
use crate::supervisor::{Clock, TickCounter, TickSource};
use crate::watchdog::{HardwareWatchdog, WorkJob, WorkSubmitter};

/// Uptime measured from construction.
#[derive(Clone, Copy, Debug)]
pub struct HostClock {
    boot: Instant,
}

impl HostClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            boot: Instant::now(),
        }
    }
}

impl Default for HostClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for HostClock {
    fn now_ms(&self) -> u64 {
        u64::try_from(self.boot.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Periodic tick driven by a background thread while armed.
#[derive(Default)]
pub struct ThreadTickSource {
    period: Duration,
    running: Option<(Arc<AtomicBool>, JoinHandle<()>)>,
}

impl ThreadTickSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TickSource for ThreadTickSource {
    fn arm(&mut self, period_ms: u32, counter: TickCounter) {
        self.disarm();
        self.period = Duration::from_millis(u64::from(period_ms.max(1)));
        let active = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&active);
        let period = self.period;
        match thread::Builder::new().name("vm-tick".into()).spawn(move || {
            while flag.load(Ordering::Acquire) {
                thread::sleep(period);
                let _ = counter.advance();
            }
        }) {
            Ok(handle) => self.running = Some((active, handle)),
            Err(err) => warn!("[vm] tick thread failed to start: {err}"),
        }
    }

    fn disarm(&mut self) {
        if let Some((active, handle)) = self.running.take() {
            active.store(false, Ordering::Release);
            if handle.join().is_err() {
                warn!("[vm] tick thread panicked");
            }
        }
    }

    fn idle(&mut self) {
        thread::sleep(self.period.max(Duration::from_millis(1)));
    }
}

impl Drop for ThreadTickSource {
    fn drop(&mut self) {
        self.disarm();
    }
}

/// Hardware watchdog model that records feeds and reports expiry.
pub struct SimulatedHardwareWatchdog {
    window: Duration,
    last_feed: Mutex<Instant>,
    feeds: AtomicU64,
}

impl SimulatedHardwareWatchdog {
    /// Timer with the given window, started now.
    #[must_use]
    pub fn new(window_ms: u32) -> Self {
        Self {
            window: Duration::from_millis(u64::from(window_ms)),
            last_feed: Mutex::new(Instant::now()),
            feeds: AtomicU64::new(0),
        }
    }

    pub fn feeds(&self) -> u64 {
        self.feeds.load(Ordering::Acquire)
    }

    /// Whether the window elapsed without a feed; real hardware would reset.
    pub fn expired(&self) -> bool {
        self.last_feed.lock().elapsed() > self.window
    }
}

impl HardwareWatchdog for SimulatedHardwareWatchdog {
    fn feed(&self) -> Result<(), WatchdogError> {
        if self.expired() {
            return Err(WatchdogError::Feed("window already elapsed"));
        }
        *self.last_feed.lock() = Instant::now();
        self.feeds.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

/// System work queue: one thread running submitted jobs in order.
pub struct WorkQueue {
    sender: Mutex<Option<Sender<WorkJob>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl WorkQueue {
    /// Start the worker thread.
    pub fn start() -> std::io::Result<Self> {
        let (sender, receiver) = mpsc::channel::<WorkJob>();
        let worker = thread::Builder::new()
            .name("sysworkq".into())
            .spawn(move || {
                for job in receiver {
                    job();
                }
                debug!("[watchdog] work queue drained");
            })?;
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Stop accepting jobs and wait for the worker to drain.
    pub fn shutdown(&self) {
        drop(self.sender.lock().take());
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                warn!("[watchdog] work queue thread panicked");
            }
        }
    }
}

impl WorkSubmitter for WorkQueue {
    fn submit(&self, job: WorkJob) -> bool {
        self.sender
            .lock()
            .as_ref()
            .is_some_and(|sender| sender.send(job).is_ok())
    }
}

impl Drop for WorkQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_thread_advances_only_while_armed() {
        let counter = TickCounter::new();
        let mut ticks = ThreadTickSource::new();
        ticks.arm(1, counter.clone());
        thread::sleep(Duration::from_millis(30));
        ticks.disarm();
        let stopped_at = counter.now();
        assert!(stopped_at > 0);
        thread::sleep(Duration::from_millis(10));
        assert_eq!(counter.now(), stopped_at);
    }

    #[test]
    fn work_queue_runs_jobs_and_refuses_after_shutdown() {
        let queue = WorkQueue::start().unwrap();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        assert!(queue.submit(Box::new(move || flag.store(true, Ordering::Release))));
        queue.shutdown();
        assert!(ran.load(Ordering::Acquire));
        assert!(!queue.submit(Box::new(|| {})));
    }

    #[test]
    fn simulated_timer_counts_feeds() {
        let timer = SimulatedHardwareWatchdog::new(1_000);
        timer.feed().unwrap();
        timer.feed().unwrap();
        assert_eq!(timer.feeds(), 2);
        assert!(!timer.expired());
    }
}
