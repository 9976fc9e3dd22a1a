// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Cooperative priority scheduler for script tasks driven by a periodic tick.
// Author: Lukas Bower

//! Cooperative scheduler.
//!
//! The runnable task with the lowest priority value runs next; tasks with
//! equal priority take turns. The reload flag is checked before every step,
//! so a reload request ends the run at the next scheduling point.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};

use heapless::Vec as HeaplessVec;
#[cfg(feature = "tick-trace")]
use log::trace;

use crate::bytecode::Slot;
use crate::capability::{RuntimeShared, TaskContext};
use crate::supervisor::engine::{ScriptTask, StepOutcome};

/// Maximum concurrent tasks.
pub const MAX_TASKS: usize = 2;

/// Shared monotonic tick count advanced by the tick source.
#[derive(Clone, Debug, Default)]
pub struct TickCounter(Arc<AtomicU64>);

impl TickCounter {
    /// Counter at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance by one tick and return the new count.
    pub fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Current tick count.
    pub fn now(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }
}

/// Periodic tick that drives the scheduler.
pub trait TickSource {
    /// Start advancing `counter` every `period_ms`.
    fn arm(&mut self, period_ms: u32, counter: TickCounter);

    /// Stop advancing the counter.
    fn disarm(&mut self);

    /// Wait while every task sleeps.
    fn idle(&mut self);
}

/// Why [`Scheduler::run`] returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunExit {
    /// Every task finished.
    Completed,
    /// A reload was requested.
    Reload,
}

struct Entry<T> {
    slot: Slot,
    priority: u8,
    wake_at: u64,
    task: T,
}

/// Task table for one cycle.
pub struct Scheduler<T: ScriptTask> {
    entries: HeaplessVec<Entry<T>, MAX_TASKS>,
    steps: u64,
}

impl<T: ScriptTask> Scheduler<T> {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: HeaplessVec::new(),
            steps: 0,
        }
    }

    /// Add a task. Hands it back if the table is full.
    pub fn spawn(&mut self, slot: Slot, priority: u8, task: T) -> Result<(), T> {
        self.entries
            .push(Entry {
                slot,
                priority,
                wake_at: 0,
                task,
            })
            .map_err(|entry| entry.task)
    }

    /// Tasks not yet finished.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no task remains.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Steps executed so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    fn next_ready(&self, now: u64) -> Option<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.wake_at <= now)
            .min_by_key(|(_, entry)| entry.priority)
            .map(|(index, _)| index)
    }

    fn requeue(&mut self, index: usize) {
        let entry = self.entries.remove(index);
        let _ = self.entries.push(entry);
    }

    /// Step tasks until all finish or a reload is requested.
    pub fn run(
        &mut self,
        shared: &RuntimeShared,
        ticks: &mut dyn TickSource,
        counter: &TickCounter,
    ) -> RunExit {
        loop {
            if shared.reload().is_set() {
                return RunExit::Reload;
            }
            if self.entries.is_empty() {
                return RunExit::Completed;
            }
            let now = counter.now();
            let Some(index) = self.next_ready(now) else {
                #[cfg(feature = "tick-trace")]
                trace!("[vm] idle at tick {now}");
                ticks.idle();
                continue;
            };
            let entry = &mut self.entries[index];
            let mut ctx = TaskContext::new(entry.slot, shared, now);
            let outcome = entry.task.step(&mut ctx);
            self.steps += 1;
            match outcome {
                StepOutcome::Yield => self.requeue(index),
                StepOutcome::Sleep(duration) => {
                    entry.wake_at = now + u64::from(duration);
                    self.requeue(index);
                }
                StepOutcome::Done => {
                    let _ = self.entries.remove(index);
                }
            }
        }
    }
}

impl<T: ScriptTask> Default for Scheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}
