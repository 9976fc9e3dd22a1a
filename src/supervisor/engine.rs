// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Script engine seam used by the supervisor.
// Author: Lukas Bower

//! Engine and task traits.
//!
//! The supervisor treats bytecode as opaque. An engine turns an image into a
//! [`ScriptTask`] that the cooperative scheduler steps until it finishes.

use crate::bytecode::Slot;
use crate::capability::{ClassSpec, TaskContext};
use crate::error::EngineError;
use crate::supervisor::heap::HeapArena;

/// What a task asks for after one step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// Runnable again immediately.
    Yield,
    /// Not runnable for the given number of ticks.
    Sleep(u32),
    /// Finished; the task is removed.
    Done,
}

/// One running script.
pub trait ScriptTask {
    /// Run until the next suspension point.
    fn step(&mut self, ctx: &mut TaskContext<'_>) -> StepOutcome;
}

/// Script runtime driven by the supervisor.
pub trait ScriptEngine {
    /// Task type produced from an image.
    type Task: ScriptTask;

    /// Prepare a fresh runtime over `arena`.
    fn init(&mut self, arena: &mut HeapArena) -> Result<(), EngineError>;

    /// Make hardware symbols visible to scripts.
    fn register_symbols(&mut self, symbols: &[&'static str]) -> Result<(), EngineError>;

    /// Make a capability class visible to scripts.
    fn register_class(&mut self, class: &ClassSpec) -> Result<(), EngineError>;

    /// Build a task for `slot` from `bytecode`.
    fn create_task(
        &mut self,
        arena: &mut HeapArena,
        slot: Slot,
        bytecode: &[u8],
    ) -> Result<Self::Task, EngineError>;

    /// Release runtime state. The arena is dropped right after.
    fn cleanup(&mut self);
}
