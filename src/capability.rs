// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Script-visible capability classes and the state they share with the firmware.
// Author: Lukas Bower

//! Capability API exposed to scripts.
//!
//! The supervisor registers [`SYMBOLS`] and one [`ClassSpec`] per
//! [`CapabilityModule`] with the engine on every cycle. Running tasks reach
//! firmware state through a [`TaskContext`], which is the only path to the
//! reload flag, the connection state and script liveness.

use alloc::sync::Arc;
use core::fmt::Write as _;
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use log::warn;

use crate::bytecode::Slot;
use crate::comm::ConnectionState;
use crate::console::ConsoleLog;
use crate::error::EngineError;
use crate::watchdog::Watchdog;

/// Hardware symbols visible to scripts.
pub const SYMBOLS: &[&str] = &["led1", "led2", "led3", "sw1", "sw2", "sw3", "sw4"];

/// Script-visible class.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClassSpec {
    /// Class name.
    pub name: &'static str,
    /// Method names.
    pub methods: &'static [&'static str],
}

/// Capability modules registered on every cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CapabilityModule {
    /// LED outputs.
    Led,
    /// Digital inputs.
    Input,
    /// Wireless link status.
    Ble,
    /// Bytecode management and liveness.
    Blink,
    /// Die temperature.
    Temperature,
    /// Analog input.
    Adc,
    /// PWM outputs.
    Pwm,
    /// I2C bus.
    I2c,
}

impl CapabilityModule {
    /// Registration order.
    pub const ALL: [Self; 8] = [
        Self::Led,
        Self::Input,
        Self::Ble,
        Self::Blink,
        Self::Temperature,
        Self::Adc,
        Self::Pwm,
        Self::I2c,
    ];

    /// Class exposed for this module.
    #[must_use]
    pub const fn spec(self) -> ClassSpec {
        match self {
            Self::Led => ClassSpec {
                name: "LED",
                methods: &["set"],
            },
            Self::Input => ClassSpec {
                name: "Input",
                methods: &["pressed?", "released?"],
            },
            Self::Ble => ClassSpec {
                name: "BLE",
                methods: &["state"],
            },
            Self::Blink => ClassSpec {
                name: "Blink",
                methods: &["req_reload?"],
            },
            Self::Temperature => ClassSpec {
                name: "Temperature",
                methods: &["value"],
            },
            Self::Adc => ClassSpec {
                name: "ADC",
                methods: &["update!", "read"],
            },
            Self::Pwm => ClassSpec {
                name: "PWM",
                methods: &["set"],
            },
            Self::I2c => ClassSpec {
                name: "I2C",
                methods: &["read", "write"],
            },
        }
    }
}

/// Reload request raised by the wireless layer and observed by the scheduler.
#[derive(Debug, Default)]
pub struct ReloadFlag(AtomicBool);

impl ReloadFlag {
    /// Flag in the cleared state.
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Clear the request at the start of a cycle.
    pub fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Firmware state shared between the supervisor, the wireless layer and the watchdog.
pub struct RuntimeShared {
    reload: ReloadFlag,
    connection: AtomicU8,
    watchdog: Arc<Watchdog>,
    console: Arc<ConsoleLog>,
}

impl RuntimeShared {
    /// Shared state with the radio off and no reload pending.
    pub fn new(watchdog: Arc<Watchdog>, console: Arc<ConsoleLog>) -> Self {
        Self {
            reload: ReloadFlag::new(),
            connection: AtomicU8::new(ConnectionState::Off as u8),
            watchdog,
            console,
        }
    }

    pub fn reload(&self) -> &ReloadFlag {
        &self.reload
    }

    pub fn watchdog(&self) -> &Watchdog {
        &self.watchdog
    }

    pub fn console(&self) -> &ConsoleLog {
        &self.console
    }

    /// Current wireless link state.
    pub fn connection_state(&self) -> ConnectionState {
        ConnectionState::from_raw(self.connection.load(Ordering::Acquire))
    }

    /// Publish a new wireless link state.
    pub fn set_connection_state(&self, state: ConnectionState) {
        self.connection.store(state as u8, Ordering::Release);
    }
}

/// View of the firmware handed to a task while it runs one step.
pub struct TaskContext<'a> {
    slot: Slot,
    shared: &'a RuntimeShared,
    tick: u64,
}

impl<'a> TaskContext<'a> {
    /// Context for `slot` at scheduler tick `tick`.
    pub fn new(slot: Slot, shared: &'a RuntimeShared, tick: u64) -> Self {
        Self { slot, shared, tick }
    }

    pub fn slot(&self) -> Slot {
        self.slot
    }

    /// Slot 1 runs the system task.
    pub fn is_system_task(&self) -> bool {
        self.slot == Slot::One
    }

    /// Scheduler tick at which this step started.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// `Blink.req_reload?`: arm and feed this slot's liveness, then report
    /// whether a reload is pending.
    pub fn poll_reload(&self) -> bool {
        self.shared.watchdog.liveness().feed(self.slot);
        self.shared.reload.is_set()
    }

    /// `BLE.state`.
    pub fn connection_state(&self) -> ConnectionState {
        self.shared.connection_state()
    }

    /// Ask the supervisor to restart the runtime. System task only.
    pub fn request_reload(&self) -> Result<(), EngineError> {
        if !self.is_system_task() {
            warn!("[vm] {} denied reload request", self.slot);
            return Err(EngineError::Unauthorized("reload"));
        }
        self.shared.reload.request();
        Ok(())
    }

    /// Print a line to the console stream.
    pub fn print(&self, line: &str) {
        let mut printer = self.shared.console.printer();
        let _ = printer.write_str(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WatchdogError;
    use crate::watchdog::{HardwareWatchdog, LivenessState};

    struct NullTimer;

    impl HardwareWatchdog for NullTimer {
        fn feed(&self) -> Result<(), WatchdogError> {
            Ok(())
        }
    }

    fn shared() -> RuntimeShared {
        RuntimeShared::new(
            Arc::new(Watchdog::new(Arc::new(NullTimer), 10_000)),
            Arc::new(ConsoleLog::new()),
        )
    }

    #[test]
    fn every_module_has_a_distinct_class() {
        let mut names: Vec<_> = CapabilityModule::ALL
            .iter()
            .map(|module| module.spec().name)
            .collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), CapabilityModule::ALL.len());
        assert!(CapabilityModule::Blink.spec().methods.contains(&"req_reload?"));
    }

    #[test]
    fn poll_reload_arms_liveness() {
        let shared = shared();
        let ctx = TaskContext::new(Slot::Two, &shared, 0);
        assert!(!ctx.poll_reload());
        assert_eq!(
            shared.watchdog().liveness().state(Slot::Two),
            LivenessState::ArmedFed
        );
        shared.reload().request();
        assert!(ctx.poll_reload());
    }

    #[test]
    fn only_system_task_may_request_reload() {
        let shared = shared();
        assert_eq!(
            TaskContext::new(Slot::Two, &shared, 0).request_reload(),
            Err(EngineError::Unauthorized("reload"))
        );
        assert!(!shared.reload().is_set());
        TaskContext::new(Slot::One, &shared, 0)
            .request_reload()
            .unwrap();
        assert!(shared.reload().is_set());
    }

    #[test]
    fn connection_state_is_visible_to_tasks() {
        let shared = shared();
        shared.set_connection_state(ConnectionState::Connected);
        let ctx = TaskContext::new(Slot::One, &shared, 0);
        assert_eq!(ctx.connection_state().code(), 2);
    }
}
