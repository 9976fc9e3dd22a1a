// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Watchdog checker thread behaviour with healthy and stalled work queues.
// Author: Lukas Bower

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serial_test::serial;
use slotvm::bytecode::Slot;
use slotvm::error::WatchdogError;
use slotvm::host::WorkQueue;
use slotvm::watchdog::{
    spawn_checker, HardwareWatchdog, MonitoredThread, Watchdog, WorkJob, WorkSubmitter,
};

#[derive(Default)]
struct CountingTimer(AtomicUsize);

impl CountingTimer {
    fn feeds(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }
}

impl HardwareWatchdog for CountingTimer {
    fn feed(&self) -> Result<(), WatchdogError> {
        self.0.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

/// Accepts jobs and never runs them.
#[derive(Default)]
struct StalledQueue(AtomicUsize);

impl WorkSubmitter for StalledQueue {
    fn submit(&self, _job: WorkJob) -> bool {
        self.0.fetch_add(1, Ordering::AcqRel);
        true
    }
}

fn watchdog(window_ms: u32) -> (Arc<Watchdog>, Arc<CountingTimer>) {
    let timer = Arc::new(CountingTimer::default());
    (Arc::new(Watchdog::new(timer.clone(), window_ms)), timer)
}

/// Heartbeat `monitored` every `period` until `stop`.
fn heartbeat_loop(
    watchdog: Arc<Watchdog>,
    monitored: MonitoredThread,
    period: Duration,
    stop: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while !stop.load(Ordering::Acquire) {
            watchdog.heartbeat(monitored);
            thread::sleep(period);
        }
    })
}

#[test]
#[serial]
fn healthy_system_is_fed_every_period() {
    let (watchdog, timer) = watchdog(200);
    let stop = Arc::new(AtomicBool::new(false));
    let queue = Arc::new(WorkQueue::start().unwrap());
    let main = heartbeat_loop(
        Arc::clone(&watchdog),
        MonitoredThread::Main,
        Duration::from_millis(10),
        Arc::clone(&stop),
    );
    let checker =
        spawn_checker(Arc::clone(&watchdog), Arc::clone(&queue), Arc::clone(&stop)).unwrap();

    thread::sleep(Duration::from_millis(400));
    stop.store(true, Ordering::Release);
    checker.join().unwrap();
    main.join().unwrap();
    queue.shutdown();

    assert!(timer.feeds() >= 4, "fed {} times", timer.feeds());
}

#[test]
#[serial]
fn stalled_work_queue_withholds_feed() {
    let (watchdog, timer) = watchdog(200);
    let stop = Arc::new(AtomicBool::new(false));
    let queue = Arc::new(StalledQueue::default());
    let main = heartbeat_loop(
        Arc::clone(&watchdog),
        MonitoredThread::Main,
        Duration::from_millis(10),
        Arc::clone(&stop),
    );
    let checker =
        spawn_checker(Arc::clone(&watchdog), Arc::clone(&queue), Arc::clone(&stop)).unwrap();

    thread::sleep(Duration::from_millis(400));
    stop.store(true, Ordering::Release);
    checker.join().unwrap();
    main.join().unwrap();

    // Only the boot period, where every heartbeat starts set, feeds.
    assert_eq!(timer.feeds(), 1);
    assert!(queue.0.load(Ordering::Acquire) >= 4);
}

#[test]
#[serial]
fn silent_script_withholds_feed_until_reset() {
    let (watchdog, timer) = watchdog(10_000);
    watchdog.liveness().feed(Slot::Two);
    let all_threads = |watchdog: &Watchdog| {
        for monitored in MonitoredThread::ALL {
            watchdog.heartbeat(monitored);
        }
    };

    assert!(watchdog.check().fed);
    all_threads(&watchdog);
    let outcome = watchdog.check();
    assert!(!outcome.fed);
    assert_eq!(outcome.stale_slots.as_slice(), &[Slot::Two]);

    watchdog.liveness().reset();
    all_threads(&watchdog);
    assert!(watchdog.check().fed);
    assert_eq!(timer.feeds(), 2);
}
