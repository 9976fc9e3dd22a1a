// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Two-level liveness aggregation gating the hardware watchdog feed.
// Author: Lukas Bower

//! Thread heartbeats and opt-in script liveness feeding one hardware timer.
//!
//! Every check period the checker reads and clears each thread heartbeat and
//! each armed script liveness flag. The hardware timer is fed only when all of
//! them were present; otherwise the feed is skipped and the timer keeps
//! counting towards a reset. Script slots that never polled liveness are
//! exempt.

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use heapless::Vec as HeaplessVec;
use log::{debug, error, warn};

use crate::bytecode::Slot;
use crate::error::WatchdogError;

/// OS threads that must heartbeat every period.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MonitoredThread {
    /// Main loop.
    Main,
    /// System work queue.
    SysWorkQueue,
}

impl MonitoredThread {
    pub const ALL: [Self; 2] = [Self::Main, Self::SysWorkQueue];

    const fn index(self) -> usize {
        match self {
            Self::Main => 0,
            Self::SysWorkQueue => 1,
        }
    }
}

impl fmt::Display for MonitoredThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Main => "main",
            Self::SysWorkQueue => "sysworkq",
        })
    }
}

/// Liveness state of one script slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum LivenessState {
    /// Script never polled; the slot is exempt.
    Unregistered = 0,
    /// Polled since the last check.
    ArmedFed = 1,
    /// Armed but not polled since the last check.
    ArmedMissed = 2,
}

impl LivenessState {
    const fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::ArmedFed,
            2 => Self::ArmedMissed,
            _ => Self::Unregistered,
        }
    }
}

/// Per-slot opt-in liveness.
pub struct SlotLiveness {
    states: [AtomicU8; 2],
}

impl SlotLiveness {
    /// Both slots unregistered.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            states: [
                AtomicU8::new(LivenessState::Unregistered as u8),
                AtomicU8::new(LivenessState::Unregistered as u8),
            ],
        }
    }

    /// Arm the slot if needed and mark it fed.
    pub fn feed(&self, slot: Slot) {
        self.states[slot.index()].store(LivenessState::ArmedFed as u8, Ordering::Release);
    }

    /// Current state of `slot`.
    pub fn state(&self, slot: Slot) -> LivenessState {
        LivenessState::from_raw(self.states[slot.index()].load(Ordering::Acquire))
    }

    /// Return every slot to unregistered.
    pub fn reset(&self) {
        for state in &self.states {
            state.store(LivenessState::Unregistered as u8, Ordering::Release);
        }
    }

    /// Consume the fed flag of `slot`. Returns false if it was armed and missed.
    fn take(&self, slot: Slot) -> bool {
        match self.states[slot.index()].compare_exchange(
            LivenessState::ArmedFed as u8,
            LivenessState::ArmedMissed as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => true,
            Err(raw) => LivenessState::from_raw(raw) == LivenessState::Unregistered,
        }
    }
}

impl Default for SlotLiveness {
    fn default() -> Self {
        Self::new()
    }
}

/// Hardware countdown timer.
pub trait HardwareWatchdog: Send + Sync {
    /// Restart the countdown.
    fn feed(&self) -> Result<(), WatchdogError>;
}

/// Result of one check period.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CheckOutcome {
    /// Whether the hardware timer was fed.
    pub fed: bool,
    /// Threads that did not heartbeat.
    pub stale_threads: HeaplessVec<MonitoredThread, 2>,
    /// Armed slots that did not poll.
    pub stale_slots: HeaplessVec<Slot, 2>,
}

impl CheckOutcome {
    /// True when every armed signal was present.
    #[must_use]
    pub fn healthy(&self) -> bool {
        self.stale_threads.is_empty() && self.stale_slots.is_empty()
    }
}

/// Liveness aggregator.
pub struct Watchdog {
    heartbeats: [AtomicBool; 2],
    liveness: SlotLiveness,
    hardware: Arc<dyn HardwareWatchdog>,
    window_ms: u32,
}

impl Watchdog {
    /// Aggregator over `hardware` with the given window. All threads start as
    /// having heartbeat so the first period after boot can feed.
    pub fn new(hardware: Arc<dyn HardwareWatchdog>, window_ms: u32) -> Self {
        Self {
            heartbeats: [AtomicBool::new(true), AtomicBool::new(true)],
            liveness: SlotLiveness::new(),
            hardware,
            window_ms,
        }
    }

    pub fn window_ms(&self) -> u32 {
        self.window_ms
    }

    /// Interval between checks, never shorter than 1 ms.
    pub fn check_period(&self) -> Duration {
        Duration::from_millis(u64::from((self.window_ms / 4).max(1)))
    }

    /// Record a heartbeat from `thread`.
    pub fn heartbeat(&self, thread: MonitoredThread) {
        self.heartbeats[thread.index()].store(true, Ordering::Release);
    }

    pub fn liveness(&self) -> &SlotLiveness {
        &self.liveness
    }

    /// Read and clear every flag, feeding the hardware only if all were set.
    pub fn check(&self) -> CheckOutcome {
        let mut outcome = CheckOutcome::default();
        for slot in Slot::ALL {
            if !self.liveness.take(slot) {
                let _ = outcome.stale_slots.push(slot);
            }
        }
        for thread in MonitoredThread::ALL {
            if !self.heartbeats[thread.index()].swap(false, Ordering::AcqRel) {
                let _ = outcome.stale_threads.push(thread);
            }
        }
        if outcome.healthy() {
            match self.hardware.feed() {
                Ok(()) => {
                    debug!("[watchdog] fed");
                    outcome.fed = true;
                }
                Err(err) => error!("[watchdog] {err}"),
            }
        } else {
            warn!(
                "[watchdog] feed withheld: threads={:?} slots={:?}",
                outcome.stale_threads, outcome.stale_slots
            );
        }
        outcome
    }
}

pub type WorkJob = Box<dyn FnOnce() + Send + 'static>;

/// Queue that runs jobs on the system work queue thread.
pub trait WorkSubmitter: Send + Sync {
    /// Queue `job`. Returns false if the queue is gone.
    fn submit(&self, job: WorkJob) -> bool;
}

/// Run the checker every `window/4` until `stop` is set.
///
/// After each check a job is queued that heartbeats the work queue thread,
/// so a stalled queue withholds the next feed.
pub fn spawn_checker<W>(
    watchdog: Arc<Watchdog>,
    work_queue: Arc<W>,
    stop: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>>
where
    W: WorkSubmitter + ?Sized + 'static,
{
    thread::Builder::new()
        .name("watchdog".into())
        .spawn(move || {
            let period = watchdog.check_period();
            while !stop.load(Ordering::Acquire) {
                let _ = watchdog.check();
                let target = Arc::clone(&watchdog);
                if !work_queue.submit(Box::new(move || {
                    target.heartbeat(MonitoredThread::SysWorkQueue);
                })) {
                    warn!("[watchdog] work queue unavailable");
                }
                thread::sleep(period);
            }
        })
}
