// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Host-mode simulation wiring the firmware core to std threads.
// Author: Lukas Bower
#![allow(clippy::module_name_repetitions)]

//! Host-mode device simulation.
//!
//! [`HostDevice`] assembles the firmware the way the board does at boot:
//! simulated flash, the bytecode store, the comm event handler, the upload
//! protocol and the liveness watchdog. [`HostDevice::run_for`] then starts the
//! VM supervisor, the watchdog checker and the system work queue on their own
//! threads while the calling thread plays the main loop.

mod replay;
mod threads;

use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result as AnyhowResult};
use log::{debug, info, warn};
use slot_wire::{
    encode_data, encode_program, image_checksum, split_image, DATA_HEADER_LEN, PROGRAM_CHUNK_LEN,
};
use spin::Mutex;

use crate::bytecode::{BytecodeStore, Slot};
use crate::capability::RuntimeShared;
use crate::comm::{Comm, SystemControl};
use crate::compress::DeflateCodec;
use crate::config::FirmwareConfig;
use crate::console::ConsoleLog;
use crate::identity::{device_name, DEVICE_NAME_CAPACITY};
use crate::storage::{MemoryFlash, Storage};
use crate::supervisor::{Supervisor, REPLAY_DEFAULTS};
use crate::upload::{ConnectionId, Notifier, UploadProtocol, WriteOutcome};
use crate::watchdog::{spawn_checker, MonitoredThread, Watchdog};

pub use replay::{ReplayEngine, ReplayTask};
pub use threads::{HostClock, SimulatedHardwareWatchdog, ThreadTickSource, WorkQueue};

/// Result alias used throughout the host-mode simulation.
pub type Result<T> = AnyhowResult<T>;

/// Bytes of every write consumed by the attribute protocol header.
const ATT_OVERHEAD: usize = 3;
const MAIN_LOOP_PERIOD: Duration = Duration::from_millis(100);
const STOP_POLL: Duration = Duration::from_millis(10);

/// Bytecode store over simulated flash.
pub type HostStore = BytecodeStore<MemoryFlash>;
/// Comm event handler wired to the host reboot hook.
pub type HostComm = Comm<MemoryFlash, DeflateCodec, Arc<HostSystem>>;

/// Notification sink that logs and records every line.
#[derive(Default)]
pub struct HostNotifier {
    program: Mutex<Vec<String>>,
    console: Mutex<Vec<String>>,
}

impl HostNotifier {
    /// Program channel lines received so far.
    pub fn program_lines(&self) -> Vec<String> {
        self.program.lock().clone()
    }

    /// Console channel lines received so far.
    pub fn console_lines(&self) -> Vec<String> {
        self.console.lock().clone()
    }
}

impl Notifier for HostNotifier {
    fn notify_program(&self, line: &str) {
        info!("[comm] notify: {line}");
        self.program.lock().push(line.to_owned());
    }

    fn notify_console(&self, line: &str) {
        info!("[console] {line}");
        self.console.lock().push(line.to_owned());
    }
}

/// Reboot hook that only records the request.
#[derive(Default)]
pub struct HostSystem {
    rebooted: AtomicBool,
}

impl HostSystem {
    /// Whether a reboot was requested.
    pub fn rebooted(&self) -> bool {
        self.rebooted.load(Ordering::Acquire)
    }
}

impl SystemControl for HostSystem {
    fn reboot(&self) {
        warn!("[comm] reboot requested; host simulation keeps running");
        self.rebooted.store(true, Ordering::Release);
    }
}

/// What happened during [`HostDevice::run_for`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunSummary {
    /// Supervisor cycles completed.
    pub cycles: u64,
    /// Hardware watchdog feeds.
    pub feeds: u64,
    /// Whether the hardware watchdog window elapsed unfed.
    pub expired: bool,
    /// Console lines forwarded to the client.
    pub console_lines: usize,
}

/// Simulated device: storage, upload path, runtime state and watchdog.
pub struct HostDevice {
    config: FirmwareConfig,
    name: heapless::String<DEVICE_NAME_CAPACITY>,
    store: Arc<HostStore>,
    shared: Arc<RuntimeShared>,
    comm: Arc<HostComm>,
    upload: UploadProtocol<Arc<HostComm>, Arc<HostNotifier>>,
    notifier: Arc<HostNotifier>,
    system: Arc<HostSystem>,
    timer: Arc<SimulatedHardwareWatchdog>,
    watchdog: Arc<Watchdog>,
    next_conn: AtomicU16,
}

impl HostDevice {
    /// Boot a device with empty flash and start advertising.
    pub fn new(config: FirmwareConfig, hardware_id: [u8; 8]) -> Result<Self> {
        config.validate()?;
        let flash = MemoryFlash::new(config.storage.capacity_bytes, config.storage.history_depth);
        let store = Arc::new(BytecodeStore::with_codec(
            Storage::new(flash),
            DeflateCodec::with_level(config.storage.compression_level),
        ));
        let timer = Arc::new(SimulatedHardwareWatchdog::new(config.watchdog.window_ms));
        let watchdog = Arc::new(Watchdog::new(timer.clone(), config.watchdog.window_ms));
        let shared = Arc::new(RuntimeShared::new(
            Arc::clone(&watchdog),
            Arc::new(ConsoleLog::new()),
        ));
        let system = Arc::new(HostSystem::default());
        let comm = Arc::new(Comm::new(
            Arc::clone(&store),
            Arc::clone(&shared),
            Arc::clone(&system),
        ));
        let notifier = Arc::new(HostNotifier::default());
        let upload = UploadProtocol::new(
            Arc::clone(&comm),
            Arc::clone(&notifier),
            config.transport.mtu,
        );
        let name = device_name(&config.device.name_prefix, &hardware_id);
        comm.on_advertising(name.as_str());
        Ok(Self {
            config,
            name,
            store,
            shared,
            comm,
            upload,
            notifier,
            system,
            timer,
            watchdog,
            next_conn: AtomicU16::new(1),
        })
    }

    /// Advertised device name.
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Bytecode store.
    pub fn store(&self) -> &HostStore {
        &self.store
    }

    /// Shared runtime state.
    pub fn shared(&self) -> &Arc<RuntimeShared> {
        &self.shared
    }

    /// Program characteristic handler.
    pub fn upload(&self) -> &UploadProtocol<Arc<HostComm>, Arc<HostNotifier>> {
        &self.upload
    }

    /// Lines sent to the client.
    pub fn notifier(&self) -> &HostNotifier {
        &self.notifier
    }

    /// Whether a RESET command asked for a reboot.
    pub fn rebooted(&self) -> bool {
        self.system.rebooted()
    }

    /// Accept a new central connection.
    pub fn connect(&self) -> ConnectionId {
        let conn = ConnectionId(self.next_conn.fetch_add(1, Ordering::AcqRel));
        self.comm.on_connected();
        conn
    }

    /// Apply a transfer unit negotiated by the central.
    pub fn exchange_mtu(&self, mtu: u16) -> Result<()> {
        if usize::from(mtu) < ATT_OVERHEAD + PROGRAM_CHUNK_LEN {
            bail!("mtu {mtu} cannot carry a PROGRAM chunk");
        }
        self.upload.set_mtu(mtu);
        debug!("[comm] mtu {mtu}");
        Ok(())
    }

    /// Drop `conn`; its upload is abandoned and the runtime reloads.
    pub fn disconnect(&self, conn: ConnectionId, reason: u8) {
        self.upload.on_disconnect(conn);
        self.comm.on_disconnected(reason);
    }

    /// One write to the program characteristic.
    pub fn write(&self, conn: ConnectionId, data: &[u8]) -> WriteOutcome {
        self.upload.handle_write(conn, data)
    }

    /// Send `image` to `slot` as DATA chunks sized for the MTU followed by
    /// the PROGRAM chunk. Returns the first non-staged outcome.
    pub fn upload_image(&self, conn: ConnectionId, slot: u8, image: &[u8]) -> Result<WriteOutcome> {
        let max_chunk = usize::from(self.upload.mtu())
            .saturating_sub(ATT_OVERHEAD)
            .max(DATA_HEADER_LEN + 1);
        let mut frame = vec![0u8; max_chunk];
        for piece in split_image(image, max_chunk) {
            let len = encode_data(piece.offset, piece.payload, &mut frame)
                .map_err(|err| anyhow!("encode data chunk: {err}"))?;
            match self.write(conn, &frame[..len]) {
                WriteOutcome::Staged { .. } => {}
                other => return Ok(other),
            }
        }
        let length = u16::try_from(image.len())
            .with_context(|| format!("image of {} bytes does not fit the wire", image.len()))?;
        Ok(self.write(conn, &encode_program(length, image_checksum(image), slot)))
    }

    /// Persist `image` for `slot` directly, bypassing the radio.
    pub fn store_image(&self, slot: Slot, image: &[u8]) -> Result<usize> {
        Ok(self.store.store(slot, image)?)
    }

    /// Delete both images and clear the trip counter.
    pub fn factory_reset(&self) -> Result<()> {
        self.store.factory_reset()?;
        Ok(())
    }

    /// Run the supervisor, the watchdog checker and the work queue for
    /// `duration`, heartbeating the main thread and forwarding console lines.
    pub fn run_for(&self, duration: Duration) -> Result<RunSummary> {
        let stop = Arc::new(AtomicBool::new(false));
        let work_queue = Arc::new(WorkQueue::start()?);
        let checker = spawn_checker(
            Arc::clone(&self.watchdog),
            Arc::clone(&work_queue),
            Arc::clone(&stop),
        )?;
        let mut supervisor = Supervisor::new(
            ReplayEngine::new(),
            Arc::clone(&self.store),
            ThreadTickSource::new(),
            HostClock::new(),
            Arc::clone(&self.shared),
            self.config.vm,
            REPLAY_DEFAULTS,
        );
        let vm_stop = Arc::clone(&stop);
        let vm = thread::Builder::new().name("vm".into()).spawn(move || {
            supervisor.run_until(&vm_stop);
            supervisor.cycles()
        })?;

        let started = Instant::now();
        let mut console_lines = 0;
        while started.elapsed() < duration {
            self.watchdog.heartbeat(MonitoredThread::Main);
            console_lines += self.shared.console().drain(&self.notifier);
            thread::sleep(MAIN_LOOP_PERIOD.min(duration.saturating_sub(started.elapsed())));
        }

        stop.store(true, Ordering::Release);
        // LOAD_IMAGES clears the flag, so keep asking until the cycle ends.
        while !vm.is_finished() {
            self.shared.reload().request();
            thread::sleep(STOP_POLL);
        }
        let cycles = vm.join().map_err(|_| anyhow!("vm thread panicked"))?;
        checker
            .join()
            .map_err(|_| anyhow!("watchdog thread panicked"))?;
        work_queue.shutdown();
        console_lines += self.shared.console().drain(&self.notifier);

        let summary = RunSummary {
            cycles,
            feeds: self.timer.feeds(),
            expired: self.timer.expired(),
            console_lines,
        };
        info!("[vm] host run finished: {summary:?}");
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use slot_wire::{encode_simple, Command};

    use super::*;
    use crate::comm::ConnectionState;

    const HARDWARE_ID: [u8; 8] = [1, 2, 3, 4, 5, 6, 7, 8];

    fn device() -> HostDevice {
        HostDevice::new(FirmwareConfig::default(), HARDWARE_ID).unwrap()
    }

    #[test]
    fn boots_advertising_with_derived_name() {
        let device = device();
        assert_eq!(device.name(), "SlotVM_25C5");
        assert_eq!(
            device.shared().connection_state(),
            ConnectionState::Advertising
        );
    }

    #[test]
    fn uploaded_image_is_stored_and_acknowledged() {
        let device = device();
        let conn = device.connect();
        let image: Vec<u8> = (0..600u16).map(|i| (i % 251) as u8 + 1).collect();
        let outcome = device.upload_image(conn, 2, &image).unwrap();
        assert_eq!(outcome, WriteOutcome::Stored { slot: 2 });
        let mut loaded = vec![0u8; 1024];
        assert_eq!(
            device.store().load(Slot::Two, &mut loaded).unwrap(),
            image.len()
        );
        assert_eq!(device.notifier().program_lines(), vec!["OK slot:2"]);
    }

    #[test]
    fn negotiated_mtu_sizes_upload_chunks() {
        let device = device();
        let conn = device.connect();
        assert!(device.exchange_mtu(10).is_err());
        device.exchange_mtu(23).unwrap();
        assert_eq!(device.upload().status_mtu(), 23);

        let image: Vec<u8> = (0..100u8).collect();
        assert_eq!(
            device.upload_image(conn, 1, &image).unwrap(),
            WriteOutcome::Stored { slot: 1 }
        );
        let mut loaded = [0u8; 128];
        assert_eq!(device.store().load(Slot::One, &mut loaded).unwrap(), 100);
    }

    #[test]
    fn reset_command_records_reboot() {
        let device = device();
        let conn = device.connect();
        assert_eq!(
            device.write(conn, &encode_simple(Command::Reset)),
            WriteOutcome::Reboot
        );
        assert!(device.rebooted());
    }

    #[test]
    fn disconnect_requests_reload() {
        let device = device();
        let conn = device.connect();
        device.disconnect(conn, 0x13);
        assert!(device.shared().reload().is_set());
        assert_eq!(
            device.shared().connection_state(),
            ConnectionState::Advertising
        );
    }

    #[test]
    fn run_for_cycles_and_feeds() {
        let mut config = FirmwareConfig::default();
        config.watchdog.window_ms = 2_000;
        let device = HostDevice::new(config, HARDWARE_ID).unwrap();
        let summary = device.run_for(Duration::from_millis(1_200)).unwrap();
        assert!(summary.cycles >= 1);
        assert!(summary.feeds >= 1);
        assert!(!summary.expired);
        assert!(device
            .notifier()
            .console_lines()
            .iter()
            .any(|line| line.starts_with("Blinked (")));
    }
}
