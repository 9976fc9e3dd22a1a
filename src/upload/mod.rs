// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Chunked bytecode upload state machine behind the program characteristic.
// Author: Lukas Bower

//! Upload protocol handler.
//!
//! [`UploadProtocol::handle_write`] consumes one write to the program
//! characteristic. DATA chunks are staged into the [`StagingSession`]; a
//! PROGRAM chunk verifies the CRC-16 of the staged bytes and hands them to the
//! [`EventHandler`] as [`UploadEvent::BytecodeReady`]. Every PROGRAM chunk
//! from the owning connection zeroes the staging buffer and returns the
//! session to idle, whether or not it was accepted. Rejections are answered
//! with an `ERROR: ...` notification line and never surface as errors to the
//! wireless layer.

mod session;

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU16, Ordering};

use heapless::String as HeaplessString;
use log::{debug, error, info, warn};
use slot_wire::{
    decode, image_checksum, render_notice, Chunk, DataChunk, Notice, ProgramChunk, Rejection,
    WireError,
};
use spin::Mutex;

use crate::bytecode::Slot;
use crate::error::BytecodeError;

pub use session::{ConnectionId, SessionState, StagingSession};

const NOTICE_CAPACITY: usize = 64;

/// Events raised towards the rest of the firmware.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadEvent<'a> {
    /// A verified image is ready to persist.
    BytecodeReady {
        /// Target slot.
        slot: Slot,
        /// Verified image bytes.
        image: &'a [u8],
    },
    /// Software reset of the whole device.
    Reboot,
    /// Restart the script runtime.
    Reload,
    /// The status characteristic was read.
    Status {
        /// Current transfer unit.
        mtu: u16,
    },
}

/// Consumer of [`UploadEvent`]s.
pub trait EventHandler: Send + Sync {
    /// Handle one event. An error on `BytecodeReady` is reported to the client.
    fn on_event(&self, event: UploadEvent<'_>) -> Result<(), BytecodeError>;
}

impl<T: EventHandler + ?Sized> EventHandler for Arc<T> {
    fn on_event(&self, event: UploadEvent<'_>) -> Result<(), BytecodeError> {
        (**self).on_event(event)
    }
}

/// Outbound notification channels.
pub trait Notifier: Send + Sync {
    /// Send a response line on the program notification channel.
    fn notify_program(&self, line: &str);

    /// Send a diagnostic line on the console notification channel.
    fn notify_console(&self, line: &str);
}

impl<T: Notifier + ?Sized> Notifier for Arc<T> {
    fn notify_program(&self, line: &str) {
        (**self).notify_program(line);
    }

    fn notify_console(&self, line: &str) {
        (**self).notify_console(line);
    }
}

/// Result of processing one write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// DATA chunk copied into the staging buffer.
    Staged {
        /// Destination offset.
        offset: u16,
        /// Bytes copied.
        len: usize,
    },
    /// Image verified and persisted.
    Stored {
        /// Slot number that received the image.
        slot: u8,
    },
    /// Chunk rejected; an error line was sent.
    Rejected(Rejection),
    /// Reboot requested.
    Reboot,
    /// Reload requested.
    Reload,
}

impl WriteOutcome {
    /// Notification line owed to the client, if any.
    #[must_use]
    pub const fn notice(&self) -> Option<Notice> {
        match *self {
            Self::Stored { slot } => Some(Notice::Stored { slot }),
            Self::Rejected(reason) => Some(Notice::Rejected(reason)),
            Self::Staged { .. } | Self::Reboot | Self::Reload => None,
        }
    }
}

fn rejection_for(err: &WireError) -> Rejection {
    match err {
        WireError::Truncated { .. } => Rejection::Truncated,
        WireError::VersionMismatch(_) => Rejection::VersionMismatch,
        WireError::UnknownCommand(_) => Rejection::UnknownCommand,
        WireError::ProgramSizeMismatch { .. } => Rejection::ProgramSize,
        WireError::DataSizeMismatch { .. }
        | WireError::BufferTooSmall { .. }
        | WireError::PayloadTooLarge(_) => Rejection::DataSize,
    }
}

/// Program characteristic handler.
pub struct UploadProtocol<H: EventHandler, N: Notifier> {
    session: Mutex<StagingSession>,
    handler: H,
    notifier: N,
    mtu: AtomicU16,
}

impl<H: EventHandler, N: Notifier> UploadProtocol<H, N> {
    /// Handler with an idle session and the given transfer unit.
    pub fn new(handler: H, notifier: N, mtu: u16) -> Self {
        Self {
            session: Mutex::new(StagingSession::new()),
            handler,
            notifier,
            mtu: AtomicU16::new(mtu),
        }
    }

    /// Process one write from `conn`. Never fails; see [`WriteOutcome`].
    pub fn handle_write(&self, conn: ConnectionId, data: &[u8]) -> WriteOutcome {
        let outcome = match decode(data) {
            Err(err) => {
                error!("[upload] {err}");
                WriteOutcome::Rejected(rejection_for(&err))
            }
            Ok(Chunk::Data(chunk)) => self.on_data(conn, chunk),
            Ok(Chunk::Program(chunk)) => self.on_program(conn, chunk),
            Ok(Chunk::Reset) => {
                info!("[upload] reset requested");
                if let Err(err) = self.handler.on_event(UploadEvent::Reboot) {
                    warn!("[upload] reboot handler failed: {err}");
                }
                WriteOutcome::Reboot
            }
            Ok(Chunk::Reload) => {
                info!("[upload] reload requested");
                if let Err(err) = self.handler.on_event(UploadEvent::Reload) {
                    warn!("[upload] reload handler failed: {err}");
                }
                WriteOutcome::Reload
            }
        };
        if let Some(notice) = outcome.notice() {
            self.send(&notice);
        }
        outcome
    }

    fn on_data(&self, conn: ConnectionId, chunk: DataChunk<'_>) -> WriteOutcome {
        debug!(
            "[upload] data offset={} size={}",
            chunk.offset,
            chunk.payload.len()
        );
        match self
            .session
            .lock()
            .stage(conn, usize::from(chunk.offset), chunk.payload)
        {
            Ok(()) => WriteOutcome::Staged {
                offset: chunk.offset,
                len: chunk.payload.len(),
            },
            Err(reason) => {
                error!(
                    "[upload] data chunk rejected: {} (offset={} size={})",
                    reason.text(),
                    chunk.offset,
                    chunk.payload.len()
                );
                WriteOutcome::Rejected(reason)
            }
        }
    }

    fn on_program(&self, conn: ConnectionId, chunk: ProgramChunk) -> WriteOutcome {
        debug!(
            "[upload] program length={} slot={} crc={:#06x}",
            chunk.length, chunk.slot, chunk.checksum
        );
        let mut session = self.session.lock();
        if let Err(reason) = session.check_owner(conn) {
            error!("[upload] program from {conn:?} rejected: session busy");
            return WriteOutcome::Rejected(reason);
        }
        let outcome = self.finalise(&session, chunk);
        session.finish();
        outcome
    }

    fn finalise(&self, session: &StagingSession, chunk: ProgramChunk) -> WriteOutcome {
        let Some(staged) = session.staged(usize::from(chunk.length)) else {
            error!("[upload] program length {} exceeds buffer", chunk.length);
            return WriteOutcome::Rejected(Rejection::SizeExceedsBuffer);
        };
        let checksum = image_checksum(staged);
        if checksum != chunk.checksum {
            error!(
                "[upload] crc mismatch: computed {checksum:#06x} expected {:#06x}",
                chunk.checksum
            );
            return WriteOutcome::Rejected(Rejection::CrcMismatch);
        }
        let slot = match Slot::from_number(chunk.slot) {
            Ok(slot) => slot,
            Err(err) => {
                error!("[upload] {err}");
                return WriteOutcome::Rejected(Rejection::InvalidSlot);
            }
        };
        match self.handler.on_event(UploadEvent::BytecodeReady {
            slot,
            image: staged,
        }) {
            Ok(()) => {
                info!("[upload] {slot} accepted {} bytes", staged.len());
                WriteOutcome::Stored {
                    slot: slot.number(),
                }
            }
            Err(err) => {
                error!("[upload] {slot} store failed: {err}");
                WriteOutcome::Rejected(Rejection::StoreFailed)
            }
        }
    }

    fn send(&self, notice: &Notice) {
        let mut line: HeaplessString<NOTICE_CAPACITY> = HeaplessString::new();
        if render_notice(&mut line, notice).is_err() {
            warn!("[upload] notice truncated");
        }
        self.notifier.notify_program(line.as_str());
    }

    /// Value of the status characteristic; raises [`UploadEvent::Status`].
    pub fn status_mtu(&self) -> u16 {
        let mtu = self.mtu.load(Ordering::Acquire);
        if let Err(err) = self.handler.on_event(UploadEvent::Status { mtu }) {
            warn!("[upload] status handler failed: {err}");
        }
        mtu
    }

    /// Record a renegotiated transfer unit.
    pub fn set_mtu(&self, mtu: u16) {
        self.mtu.store(mtu, Ordering::Release);
    }

    /// Current transfer unit, without raising a status event.
    pub fn mtu(&self) -> u16 {
        self.mtu.load(Ordering::Acquire)
    }

    /// Drop any upload owned by `conn`.
    pub fn on_disconnect(&self, conn: ConnectionId) {
        if self.session.lock().abandon(conn) {
            info!("[upload] {conn:?} disconnected mid-upload; staging cleared");
        }
    }

    /// Ownership state of the staging buffer.
    pub fn session_state(&self) -> SessionState {
        self.session.lock().state()
    }

    /// Run `f` over the staging buffer.
    pub fn with_staging<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(self.session.lock().bytes())
    }

    /// Outbound notification channels.
    pub fn notifier(&self) -> &N {
        &self.notifier
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_errors_map_to_rejections() {
        assert_eq!(
            rejection_for(&WireError::VersionMismatch(2)),
            Rejection::VersionMismatch
        );
        assert_eq!(
            rejection_for(&WireError::DataSizeMismatch {
                declared: 10,
                actual: 9
            }),
            Rejection::DataSize
        );
        assert_eq!(
            rejection_for(&WireError::ProgramSizeMismatch { actual: 7 }),
            Rejection::ProgramSize
        );
    }

    #[test]
    fn only_final_and_rejected_outcomes_notify() {
        assert_eq!(
            WriteOutcome::Stored { slot: 2 }.notice(),
            Some(Notice::Stored { slot: 2 })
        );
        assert_eq!(WriteOutcome::Reload.notice(), None);
        assert_eq!(
            WriteOutcome::Staged { offset: 0, len: 4 }.notice(),
            None
        );
    }
}
