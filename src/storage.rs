// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Flash key-value storage with serialized writes and history reads.
// Author: Lukas Bower

//! Flash-backed key-value byte store keyed by small integer ids.
//!
//! [`Storage`] wraps a [`FlashBackend`] and serializes writes and deletes under
//! a single lock. Reads are not serialized against writes; backends keep each
//! written generation immutable so a reader observes either the previous or
//! the new value. [`MemoryFlash`] is the RAM backend used by host builds and
//! tests.

use alloc::collections::BTreeMap;
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};

use log::{debug, warn};
use spin::Mutex;

use crate::error::StorageError;

/// Identifier of a flash record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StorageId(pub u16);

impl StorageId {
    /// Compressed image for slot 1.
    pub const SLOT1_IMAGE: Self = Self(1);
    /// Compressed image for slot 2.
    pub const SLOT2_IMAGE: Self = Self(2);
    /// Trip upload counter, cleared by factory reset.
    pub const TRIP_COUNT: Self = Self(0x10);
    /// Lifetime upload counter.
    pub const TOTAL_COUNT: Self = Self(0x11);
}

impl fmt::Display for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// Raw flash key-value device.
pub trait FlashBackend: Send + Sync {
    /// Copy generation `generation` of `id` into `out`, where 0 is the newest.
    fn read_hist(
        &self,
        id: StorageId,
        generation: u16,
        out: &mut [u8],
    ) -> Result<usize, StorageError>;

    /// Store `data` as the newest generation of `id`. Returns the bytes
    /// written, or 0 when `data` matches the newest generation.
    fn write(&self, id: StorageId, data: &[u8]) -> Result<usize, StorageError>;

    /// Remove every generation of `id`. Deleting an absent id succeeds.
    fn delete(&self, id: StorageId) -> Result<(), StorageError>;

    /// Length of the newest generation of `id`.
    fn len(&self, id: StorageId) -> Result<usize, StorageError>;

    /// Bytes still available for new records.
    fn free_space(&self) -> usize;
}

/// Bookkeeping bytes charged per stored generation.
const ENTRY_OVERHEAD: usize = 8;

/// RAM-backed flash with bounded capacity and per-id history.
pub struct MemoryFlash {
    capacity: usize,
    history_depth: usize,
    records: Mutex<BTreeMap<StorageId, VecDeque<Arc<[u8]>>>>,
    fail_writes: AtomicBool,
    fail_id: Mutex<Option<StorageId>>,
}

impl MemoryFlash {
    /// Create an empty device of `capacity` bytes keeping `history_depth`
    /// generations per id.
    #[must_use]
    pub fn new(capacity: usize, history_depth: usize) -> Self {
        Self {
            capacity,
            history_depth: history_depth.max(1),
            records: Mutex::new(BTreeMap::new()),
            fail_writes: AtomicBool::new(false),
            fail_id: Mutex::new(None),
        }
    }

    /// Make subsequent writes fail with a device error.
    pub fn set_write_failure(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Release);
    }

    /// Make writes to `id` alone fail; `None` clears it.
    pub fn set_write_failure_for(&self, id: Option<StorageId>) {
        *self.fail_id.lock() = id;
    }

    /// Number of generations currently held for `id`.
    #[must_use]
    pub fn generations(&self, id: StorageId) -> usize {
        self.records.lock().get(&id).map_or(0, VecDeque::len)
    }

    fn used(records: &BTreeMap<StorageId, VecDeque<Arc<[u8]>>>) -> usize {
        records
            .values()
            .flat_map(|history| history.iter())
            .map(|value| value.len() + ENTRY_OVERHEAD)
            .sum()
    }
}

impl FlashBackend for MemoryFlash {
    fn read_hist(
        &self,
        id: StorageId,
        generation: u16,
        out: &mut [u8],
    ) -> Result<usize, StorageError> {
        let value = {
            let records = self.records.lock();
            records
                .get(&id)
                .and_then(|history| history.get(usize::from(generation)))
                .cloned()
                .ok_or(StorageError::NotFound { id, generation })?
        };
        if value.len() > out.len() {
            return Err(StorageError::BufferTooSmall {
                id,
                stored: value.len(),
                capacity: out.len(),
            });
        }
        out[..value.len()].copy_from_slice(&value);
        Ok(value.len())
    }

    fn write(&self, id: StorageId, data: &[u8]) -> Result<usize, StorageError> {
        if self.fail_writes.load(Ordering::Acquire) || *self.fail_id.lock() == Some(id) {
            return Err(StorageError::Device("write failed"));
        }
        let mut records = self.records.lock();
        if let Some(newest) = records.get(&id).and_then(VecDeque::front) {
            if newest.as_ref() == data {
                return Ok(0);
            }
        }

        let used = Self::used(&records);
        let evicted = records
            .get(&id)
            .filter(|history| history.len() >= self.history_depth)
            .and_then(VecDeque::back)
            .map_or(0, |oldest| oldest.len() + ENTRY_OVERHEAD);
        let free = self.capacity.saturating_sub(used) + evicted;
        let needed = data.len() + ENTRY_OVERHEAD;
        if needed > free {
            return Err(StorageError::NoSpace { needed, free });
        }

        let history = records.entry(id).or_default();
        if history.len() >= self.history_depth {
            let _ = history.pop_back();
        }
        history.push_front(Arc::from(data));
        Ok(data.len())
    }

    fn delete(&self, id: StorageId) -> Result<(), StorageError> {
        let _ = self.records.lock().remove(&id);
        Ok(())
    }

    fn len(&self, id: StorageId) -> Result<usize, StorageError> {
        self.records
            .lock()
            .get(&id)
            .and_then(VecDeque::front)
            .map(|value| value.len())
            .ok_or(StorageError::NotFound { id, generation: 0 })
    }

    fn free_space(&self) -> usize {
        self.capacity.saturating_sub(Self::used(&self.records.lock()))
    }
}

/// Key-value store with a single write lock.
pub struct Storage<F: FlashBackend> {
    backend: F,
    write_lock: Mutex<()>,
}

impl<F: FlashBackend> Storage<F> {
    /// Wrap a flash backend.
    pub const fn new(backend: F) -> Self {
        Self {
            backend,
            write_lock: Mutex::new(()),
        }
    }

    /// Borrow the underlying backend.
    pub fn backend(&self) -> &F {
        &self.backend
    }

    /// Read the newest value of `id` into `out`.
    pub fn read(&self, id: StorageId, out: &mut [u8]) -> Result<usize, StorageError> {
        self.read_at_generation(id, 0, out)
    }

    /// Read a historical value of `id`; generation 0 is the newest.
    pub fn read_at_generation(
        &self,
        id: StorageId,
        generation: u16,
        out: &mut [u8],
    ) -> Result<usize, StorageError> {
        self.backend.read_hist(id, generation, out)
    }

    /// Overwrite `id` with `data`.
    pub fn write(&self, id: StorageId, data: &[u8]) -> Result<usize, StorageError> {
        let _guard = self.write_lock.lock();
        match self.backend.write(id, data) {
            Ok(written) => {
                debug!("[storage] write id={id} len={} written={written}", data.len());
                Ok(written)
            }
            Err(err) => {
                warn!("[storage] write id={id} failed: {err}");
                Err(err)
            }
        }
    }

    /// Delete `id`.
    pub fn delete(&self, id: StorageId) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock();
        self.backend.delete(id)?;
        debug!("[storage] delete id={id}");
        Ok(())
    }

    /// Stored length of `id`.
    pub fn length(&self, id: StorageId) -> Result<usize, StorageError> {
        self.backend.len(id)
    }

    /// Free bytes on the device.
    pub fn free_space(&self) -> usize {
        self.backend.free_space()
    }
}
