// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Minimal script engine that replays byte programs on host builds.
// Author: Lukas Bower

//! Replay engine.
//!
//! A program is a byte sequence executed in a loop. Each non-zero byte polls
//! `Blink.req_reload?` and then sleeps that many ticks; the task ends when the
//! poll reports a pending reload. A zero byte ends the task. An empty program
//! finishes immediately.

use crate::bytecode::Slot;
use crate::capability::{ClassSpec, TaskContext};
use crate::error::EngineError;
use crate::supervisor::{HeapArena, ScriptEngine, ScriptTask, StepOutcome};

const RUNTIME_OVERHEAD: usize = 1024;
const TASK_OVERHEAD: usize = 256;

/// Host stand-in for the bytecode VM.
#[derive(Debug, Default)]
pub struct ReplayEngine {
    initialised: bool,
    symbols: usize,
    classes: Vec<&'static str>,
    inits: u64,
}

impl ReplayEngine {
    /// Engine awaiting `init`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Classes registered in the current cycle.
    pub fn classes(&self) -> &[&'static str] {
        &self.classes
    }

    /// Symbols registered in the current cycle.
    pub fn symbols(&self) -> usize {
        self.symbols
    }

    /// Number of times the runtime was initialised.
    pub fn inits(&self) -> u64 {
        self.inits
    }

    fn ensure_init(&self) -> Result<(), EngineError> {
        if self.initialised {
            Ok(())
        } else {
            Err(EngineError::NotInitialised)
        }
    }
}

impl ScriptEngine for ReplayEngine {
    type Task = ReplayTask;

    fn init(&mut self, arena: &mut HeapArena) -> Result<(), EngineError> {
        arena.reserve(RUNTIME_OVERHEAD)?;
        self.initialised = true;
        self.symbols = 0;
        self.classes.clear();
        self.inits += 1;
        Ok(())
    }

    fn register_symbols(&mut self, symbols: &[&'static str]) -> Result<(), EngineError> {
        self.ensure_init()?;
        self.symbols = symbols.len();
        Ok(())
    }

    fn register_class(&mut self, class: &ClassSpec) -> Result<(), EngineError> {
        self.ensure_init()?;
        self.classes.push(class.name);
        Ok(())
    }

    fn create_task(
        &mut self,
        arena: &mut HeapArena,
        slot: Slot,
        bytecode: &[u8],
    ) -> Result<ReplayTask, EngineError> {
        self.ensure_init()?;
        arena.reserve(bytecode.len() + TASK_OVERHEAD)?;
        Ok(ReplayTask {
            slot,
            program: bytecode.to_vec(),
            pc: 0,
        })
    }

    fn cleanup(&mut self) {
        self.initialised = false;
    }
}

/// Task running one replay program.
#[derive(Debug)]
pub struct ReplayTask {
    slot: Slot,
    program: Vec<u8>,
    pc: usize,
}

impl ReplayTask {
    /// Slot the task was created for.
    pub fn slot(&self) -> Slot {
        self.slot
    }
}

impl ScriptTask for ReplayTask {
    fn step(&mut self, ctx: &mut TaskContext<'_>) -> StepOutcome {
        let Some(&op) = self.program.get(self.pc) else {
            return StepOutcome::Done;
        };
        self.pc = (self.pc + 1) % self.program.len();
        if op == 0 || ctx.poll_reload() {
            return StepOutcome::Done;
        }
        StepOutcome::Sleep(u32::from(op))
    }
}
