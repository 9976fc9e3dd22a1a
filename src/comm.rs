// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Bridges wireless link and upload events to the store, the runtime and reboot.
// Author: Lukas Bower

//! Wireless event handling.

use alloc::sync::Arc;

use log::{debug, error, info};

use crate::bytecode::BytecodeStore;
use crate::capability::RuntimeShared;
use crate::compress::Codec;
use crate::error::BytecodeError;
use crate::storage::FlashBackend;
use crate::upload::{EventHandler, UploadEvent};

/// Wireless link state as reported to scripts by `BLE.state`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Radio idle.
    Off = 0,
    /// Advertising, no central connected.
    Advertising = 1,
    /// A central is connected.
    Connected = 2,
}

impl ConnectionState {
    pub(crate) const fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Advertising,
            2 => Self::Connected,
            _ => Self::Off,
        }
    }

    /// Value returned to scripts.
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }
}

/// Device level controls.
pub trait SystemControl: Send + Sync {
    /// Software reset of the whole device.
    fn reboot(&self);
}

impl<T: SystemControl + ?Sized> SystemControl for Arc<T> {
    fn reboot(&self) {
        (**self).reboot();
    }
}

/// Event handler behind the upload protocol.
pub struct Comm<F: FlashBackend, C: Codec, S: SystemControl> {
    store: Arc<BytecodeStore<F, C>>,
    shared: Arc<RuntimeShared>,
    system: S,
}

impl<F: FlashBackend, C: Codec, S: SystemControl> Comm<F, C, S> {
    /// Bridge into `store` and the runtime state.
    pub fn new(store: Arc<BytecodeStore<F, C>>, shared: Arc<RuntimeShared>, system: S) -> Self {
        Self {
            store,
            shared,
            system,
        }
    }

    /// Radio started advertising.
    pub fn on_advertising(&self, name: &str) {
        debug!("[comm] advertising as {name}");
        self.shared.set_connection_state(ConnectionState::Advertising);
    }

    /// A central connected.
    pub fn on_connected(&self) {
        debug!("[comm] connected");
        self.shared.set_connection_state(ConnectionState::Connected);
    }

    /// The central disconnected; advertising resumes and the runtime reloads.
    pub fn on_disconnected(&self, reason: u8) {
        debug!("[comm] disconnected ({reason})");
        self.shared.set_connection_state(ConnectionState::Advertising);
        self.shared.reload().request();
    }

    /// Current link state.
    pub fn connection_state(&self) -> ConnectionState {
        self.shared.connection_state()
    }
}

impl<F: FlashBackend, C: Codec, S: SystemControl> EventHandler for Comm<F, C, S> {
    fn on_event(&self, event: UploadEvent<'_>) -> Result<(), BytecodeError> {
        match event {
            UploadEvent::BytecodeReady { slot, image } => {
                debug!("[comm] bytecode {slot} size {}", image.len());
                match self.store.store(slot, image) {
                    Ok(_) => Ok(()),
                    Err(err) => {
                        error!("[comm] store error: {err}");
                        Err(err)
                    }
                }
            }
            UploadEvent::Reload => {
                info!("[comm] reloading");
                self.shared.reload().request();
                Ok(())
            }
            UploadEvent::Reboot => {
                info!("[comm] rebooting");
                self.system.reboot();
                Ok(())
            }
            UploadEvent::Status { mtu } => {
                debug!("[comm] status read, mtu {mtu}");
                Ok(())
            }
        }
    }
}
