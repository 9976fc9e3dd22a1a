// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Restart-the-world supervisor loop for the two script slots.
// Author: Lukas Bower

//! VM supervisor.
//!
//! Each cycle walks INIT → REGISTER_API → LOAD_IMAGES → RUN → TEARDOWN and
//! starts again. A cycle is a full cold start of the script runtime: a new
//! heap arena, fresh class registration and freshly loaded images. RUN ends
//! when every task finishes or a reload is requested.

mod defaults;
mod engine;
mod heap;
mod scheduler;

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::fmt::Write as _;
use core::sync::atomic::{AtomicBool, Ordering};

use log::{debug, error, info, warn};

use crate::bytecode::{ImageSource, Slot};
use crate::capability::{CapabilityModule, RuntimeShared, SYMBOLS};
use crate::config::{VmConfig, COMPRESSED_CAPACITY, MAX_BYTECODE_SIZE};

pub use defaults::{DefaultImages, REPLAY_DEFAULTS};
pub use engine::{ScriptEngine, ScriptTask, StepOutcome};
pub use heap::HeapArena;
pub use scheduler::{RunExit, Scheduler, TickCounter, TickSource, MAX_TASKS};

/// Millisecond uptime source.
pub trait Clock {
    /// Milliseconds since boot.
    fn now_ms(&self) -> u64;
}

/// Supervisor lifecycle stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SupervisorState {
    /// Allocating the heap arena and initialising the engine.
    Init,
    /// Registering symbols and capability classes.
    RegisterApi,
    /// Loading slot images.
    LoadImages,
    /// Scheduler running.
    Run,
    /// Releasing the runtime.
    Teardown,
}

/// Where a slot's image came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageOrigin {
    /// Decompressed from the bytecode store.
    Stored,
    /// Compiled-in fallback.
    Default,
}

/// Image loaded for one slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadedImage {
    /// Slot the image runs in.
    pub slot: Slot,
    /// Image length.
    pub len: usize,
    /// Source of the image.
    pub origin: ImageOrigin,
}

/// Summary of one supervisor cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CycleReport {
    /// Cycle number, starting at 1.
    pub cycle: u64,
    /// Images loaded; empty if INIT failed.
    pub images: heapless::Vec<LoadedImage, MAX_TASKS>,
    /// Tasks created.
    pub tasks: usize,
    /// Capability registrations that failed.
    pub registration_failures: usize,
    /// How RUN ended; `None` if the cycle never reached RUN.
    pub exit: Option<RunExit>,
    /// Task steps executed during RUN.
    pub steps: u64,
}

/// Outer supervisor loop.
pub struct Supervisor<E, S, T, C>
where
    E: ScriptEngine,
    S: ImageSource + ?Sized,
    T: TickSource,
    C: Clock,
{
    engine: E,
    images: Arc<S>,
    ticks: T,
    clock: C,
    shared: Arc<RuntimeShared>,
    config: VmConfig,
    defaults: DefaultImages,
    counter: TickCounter,
    state: SupervisorState,
    buffers: Box<[[u8; MAX_BYTECODE_SIZE]; MAX_TASKS]>,
    mark_ms: u64,
    cycles: u64,
}

impl<E, S, T, C> Supervisor<E, S, T, C>
where
    E: ScriptEngine,
    S: ImageSource + ?Sized,
    T: TickSource,
    C: Clock,
{
    /// Supervisor in the INIT state.
    pub fn new(
        engine: E,
        images: Arc<S>,
        ticks: T,
        clock: C,
        shared: Arc<RuntimeShared>,
        config: VmConfig,
        defaults: DefaultImages,
    ) -> Self {
        let mark_ms = clock.now_ms();
        Self {
            engine,
            images,
            ticks,
            clock,
            shared,
            config,
            defaults,
            counter: TickCounter::new(),
            state: SupervisorState::Init,
            buffers: Box::new([[0u8; MAX_BYTECODE_SIZE]; MAX_TASKS]),
            mark_ms,
            cycles: 0,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn shared(&self) -> &Arc<RuntimeShared> {
        &self.shared
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Tick counter advanced during RUN.
    pub fn ticks(&self) -> &TickCounter {
        &self.counter
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Run cycles until `stop` is set. A cycle in RUN only notices `stop`
    /// once it ends, so callers also request a reload.
    pub fn run_until(&mut self, stop: &AtomicBool) {
        while !stop.load(Ordering::Acquire) {
            let report = self.run_cycle();
            debug!("[vm] cycle {} finished: {:?}", report.cycle, report.exit);
        }
    }

    /// Run one full cycle and return to INIT.
    pub fn run_cycle(&mut self) -> CycleReport {
        self.cycles += 1;
        let mut report = CycleReport {
            cycle: self.cycles,
            images: heapless::Vec::new(),
            tasks: 0,
            registration_failures: 0,
            exit: None,
            steps: 0,
        };

        self.state = SupervisorState::Init;
        let mut arena = match self.init() {
            Ok(arena) => arena,
            Err(err) => {
                error!("[vm] init failed: {err}");
                self.teardown();
                return report;
            }
        };

        self.state = SupervisorState::RegisterApi;
        report.registration_failures = self.register_api();

        self.state = SupervisorState::LoadImages;
        self.shared.reload().clear();
        for slot in Slot::ALL {
            let _ = report.images.push(self.load_image(slot));
        }

        self.state = SupervisorState::Run;
        let mut scheduler = Scheduler::new();
        for image in &report.images {
            let bytecode = &self.buffers[image.slot.index()][..image.len];
            match self.engine.create_task(&mut arena, image.slot, bytecode) {
                Ok(task) => {
                    if scheduler
                        .spawn(image.slot, self.priority(image.slot), task)
                        .is_err()
                    {
                        error!("[vm] task table full, {} dropped", image.slot);
                    }
                }
                Err(err) => error!("[vm] failed to create task for {}: {err}", image.slot),
            }
        }
        report.tasks = scheduler.len();
        let blinked = self.delta_ms();
        let _ = writeln!(self.shared.console().printer(), "Blinked ({blinked} ms)");

        self.ticks.arm(self.config.tick_ms, self.counter.clone());
        let exit = scheduler.run(&self.shared, &mut self.ticks, &self.counter);
        self.ticks.disarm();
        report.exit = Some(exit);
        report.steps = scheduler.steps();
        let uptime = self.delta_ms();
        let _ = writeln!(
            self.shared.console().printer(),
            "run stopped (uptime: {uptime} ms)"
        );
        info!("[vm] run ended: {exit:?} after {} steps", report.steps);
        drop(scheduler);

        self.state = SupervisorState::Teardown;
        self.teardown();
        drop(arena);
        self.state = SupervisorState::Init;
        report
    }

    fn init(&mut self) -> Result<HeapArena, crate::error::EngineError> {
        let mut arena = HeapArena::new(self.config.heap_bytes)?;
        self.engine.init(&mut arena)?;
        debug!("[vm] heap arena {} bytes", arena.size());
        Ok(arena)
    }

    fn register_api(&mut self) -> usize {
        let mut failures = 0;
        if let Err(err) = self.engine.register_symbols(SYMBOLS) {
            error!("[vm] failed to define symbols: {err}");
            failures += 1;
        }
        for module in CapabilityModule::ALL {
            let spec = module.spec();
            if let Err(err) = self.engine.register_class(&spec) {
                error!("[vm] failed to define class {}: {err}", spec.name);
                failures += 1;
            }
        }
        failures
    }

    fn load_image(&mut self, slot: Slot) -> LoadedImage {
        let buffer = &mut self.buffers[slot.index()];
        buffer.fill(0);
        let stored = match self.images.stored_len(slot) {
            // Stored length is compressed; the decompressed size is checked by `load`.
            Ok(len) if len > 0 && len <= COMPRESSED_CAPACITY => {
                match self.images.load(slot, &mut buffer[..]) {
                    Ok(len) if len > 0 => Some(len),
                    Ok(_) => None,
                    Err(err) => {
                        warn!("[vm] {slot} load failed: {err}");
                        None
                    }
                }
            }
            Ok(len) => {
                debug!("[vm] {slot} stored length {len} unusable");
                None
            }
            Err(err) => {
                debug!("[vm] {slot} has no stored image: {err}");
                None
            }
        };
        if let Some(len) = stored {
            debug!("[vm] {slot} loaded {len}/{} bytes", buffer.len());
            return LoadedImage {
                slot,
                len,
                origin: ImageOrigin::Stored,
            };
        }

        buffer.fill(0);
        let fallback = self.defaults.for_slot(slot);
        let len = fallback.len().min(buffer.len());
        buffer[..len].copy_from_slice(&fallback[..len]);
        info!("[vm] {slot} factory default image loaded ({len} bytes)");
        LoadedImage {
            slot,
            len,
            origin: ImageOrigin::Default,
        }
    }

    fn priority(&self, slot: Slot) -> u8 {
        match slot {
            Slot::One => self.config.slot1_priority,
            Slot::Two => self.config.slot2_priority,
        }
    }

    fn teardown(&mut self) {
        self.shared.watchdog().liveness().reset();
        self.engine.cleanup();
    }

    fn delta_ms(&mut self) -> u64 {
        let now = self.clock.now_ms();
        let delta = now.saturating_sub(self.mark_ms);
        self.mark_ms = now;
        delta
    }
}
