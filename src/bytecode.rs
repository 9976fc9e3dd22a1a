// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Per-slot compressed bytecode persistence and upload counters.
// Author: Lukas Bower

//! Bytecode store mapping script slots onto compressed flash records.

use alloc::boxed::Box;
use core::fmt;

use log::{info, warn};
use spin::Mutex;

use crate::compress::{Codec, DeflateCodec};
use crate::config::{COMPRESSED_CAPACITY, MAX_BYTECODE_SIZE};
use crate::error::BytecodeError;
use crate::settings::UploadCounters;
use crate::storage::{FlashBackend, Storage, StorageId};

/// Persisted script identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Slot {
    /// Slot 1, runs the system task.
    One,
    /// Slot 2.
    Two,
}

impl Slot {
    /// Both slots in scheduling order.
    pub const ALL: [Self; 2] = [Self::One, Self::Two];

    /// Parse the wire slot number.
    pub fn from_number(number: u8) -> Result<Self, BytecodeError> {
        match number {
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            other => Err(BytecodeError::InvalidSlot(other)),
        }
    }

    /// Wire slot number.
    #[must_use]
    pub const fn number(self) -> u8 {
        match self {
            Self::One => 1,
            Self::Two => 2,
        }
    }

    /// Zero based index for per-slot tables.
    #[must_use]
    pub const fn index(self) -> usize {
        self.number() as usize - 1
    }

    /// Flash record holding the compressed image.
    #[must_use]
    pub const fn storage_id(self) -> StorageId {
        match self {
            Self::One => StorageId::SLOT1_IMAGE,
            Self::Two => StorageId::SLOT2_IMAGE,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot{}", self.number())
    }
}

/// Read side of the store as seen by the supervisor.
pub trait ImageSource: Send + Sync {
    /// Stored (compressed) length of the slot image.
    fn stored_len(&self, slot: Slot) -> Result<usize, BytecodeError>;

    /// Decompress the slot image into `out`.
    fn load(&self, slot: Slot, out: &mut [u8]) -> Result<usize, BytecodeError>;
}

/// Compressed bytecode persistence for both slots.
pub struct BytecodeStore<F: FlashBackend, C: Codec = DeflateCodec> {
    storage: Storage<F>,
    codec: C,
    scratch: Mutex<Box<[u8; COMPRESSED_CAPACITY]>>,
}

impl<F: FlashBackend> BytecodeStore<F> {
    /// Store using the default deflate codec.
    pub fn new(storage: Storage<F>) -> Self {
        Self::with_codec(storage, DeflateCodec::default())
    }
}

impl<F: FlashBackend, C: Codec> BytecodeStore<F, C> {
    /// Store using an explicit codec.
    pub fn with_codec(storage: Storage<F>, codec: C) -> Self {
        info!("[store] flash free space {} bytes", storage.free_space());
        Self {
            storage,
            codec,
            scratch: Mutex::new(Box::new([0u8; COMPRESSED_CAPACITY])),
        }
    }

    /// Underlying key-value storage.
    pub fn storage(&self) -> &Storage<F> {
        &self.storage
    }

    /// Compress and persist `image` for `slot`, then bump the upload counters.
    ///
    /// Returns the bytes written to flash; 0 means the stored image was
    /// already identical. The image write is the commit point: a counter
    /// update failure after it is logged and does not fail the store.
    pub fn store(&self, slot: Slot, image: &[u8]) -> Result<usize, BytecodeError> {
        if image.len() > MAX_BYTECODE_SIZE {
            return Err(BytecodeError::ImageTooLarge {
                len: image.len(),
                max: MAX_BYTECODE_SIZE,
            });
        }
        let written = {
            let mut scratch = self.scratch.lock();
            let packed = self.codec.compress(image, &mut scratch[..])?;
            self.storage.write(slot.storage_id(), &scratch[..packed])?
        };
        info!(
            "[store] {slot} stored {} bytes ({written} written)",
            image.len()
        );
        match UploadCounters::increment(&self.storage) {
            Ok(counters) => info!(
                "[store] uploads trip={} total={}",
                counters.trip, counters.total
            ),
            Err(err) => warn!("[store] counter update failed: {err}"),
        }
        Ok(written)
    }

    /// Decompress the image of `slot` into `out`.
    pub fn load(&self, slot: Slot, out: &mut [u8]) -> Result<usize, BytecodeError> {
        let mut scratch = self.scratch.lock();
        let packed = self.storage.read(slot.storage_id(), &mut scratch[..])?;
        Ok(self.codec.decompress(&scratch[..packed], out)?)
    }

    /// Compressed length of the stored image.
    pub fn length(&self, slot: Slot) -> Result<usize, BytecodeError> {
        Ok(self.storage.length(slot.storage_id())?)
    }

    /// Remove the image of `slot`.
    pub fn delete(&self, slot: Slot) -> Result<(), BytecodeError> {
        self.storage.delete(slot.storage_id())?;
        info!("[store] {slot} deleted");
        Ok(())
    }

    /// Delete both images and clear the trip counter.
    pub fn factory_reset(&self) -> Result<(), BytecodeError> {
        for slot in Slot::ALL {
            self.delete(slot)?;
        }
        UploadCounters::reset_trip(&self.storage)?;
        info!("[store] factory reset complete");
        Ok(())
    }

    /// Current upload counters.
    pub fn counters(&self) -> UploadCounters {
        UploadCounters::load(&self.storage)
    }
}

impl<F: FlashBackend, C: Codec> ImageSource for BytecodeStore<F, C> {
    fn stored_len(&self, slot: Slot) -> Result<usize, BytecodeError> {
        self.length(slot)
    }

    fn load(&self, slot: Slot, out: &mut [u8]) -> Result<usize, BytecodeError> {
        BytecodeStore::load(self, slot, out)
    }
}
