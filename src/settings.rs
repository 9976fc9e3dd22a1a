// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Persisted upload counters stored beside the bytecode images.
// Author: Lukas Bower

//! Saturating upload counters.

use log::warn;

use crate::error::StorageError;
use crate::storage::{FlashBackend, Storage, StorageId};

/// Successful upload counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UploadCounters {
    pub trip: u32,
    pub total: u32,
}

fn read_counter<F: FlashBackend>(storage: &Storage<F>, id: StorageId) -> u32 {
    let mut raw = [0u8; 4];
    match storage.read(id, &mut raw) {
        Ok(4) => u32::from_le_bytes(raw),
        Ok(len) => {
            warn!("[store] counter {id} has unexpected length {len}");
            0
        }
        Err(StorageError::NotFound { .. }) => 0,
        Err(err) => {
            warn!("[store] counter {id} unreadable: {err}");
            0
        }
    }
}

impl UploadCounters {
    /// Read both counters; absent records count as zero.
    pub fn load<F: FlashBackend>(storage: &Storage<F>) -> Self {
        Self {
            trip: read_counter(storage, StorageId::TRIP_COUNT),
            total: read_counter(storage, StorageId::TOTAL_COUNT),
        }
    }

    /// Add one to both counters, saturating at `u32::MAX`, and persist them.
    pub fn increment<F: FlashBackend>(storage: &Storage<F>) -> Result<Self, StorageError> {
        let current = Self::load(storage);
        let next = Self {
            trip: current.trip.saturating_add(1),
            total: current.total.saturating_add(1),
        };
        storage.write(StorageId::TRIP_COUNT, &next.trip.to_le_bytes())?;
        storage.write(StorageId::TOTAL_COUNT, &next.total.to_le_bytes())?;
        Ok(next)
    }

    /// Clear the trip counter.
    pub fn reset_trip<F: FlashBackend>(storage: &Storage<F>) -> Result<(), StorageError> {
        storage.write(StorageId::TRIP_COUNT, &0u32.to_le_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryFlash;

    #[test]
    fn counters_start_at_zero_and_persist() {
        let storage = Storage::new(MemoryFlash::new(1024, 2));
        assert_eq!(UploadCounters::load(&storage), UploadCounters::default());
        UploadCounters::increment(&storage).unwrap();
        let after = UploadCounters::increment(&storage).unwrap();
        assert_eq!(after, UploadCounters { trip: 2, total: 2 });
        assert_eq!(UploadCounters::load(&storage), after);
    }

    #[test]
    fn counters_saturate() {
        let storage = Storage::new(MemoryFlash::new(1024, 2));
        storage
            .write(StorageId::TOTAL_COUNT, &u32::MAX.to_le_bytes())
            .unwrap();
        let after = UploadCounters::increment(&storage).unwrap();
        assert_eq!(after.total, u32::MAX);
        assert_eq!(after.trip, 1);
    }

    #[test]
    fn reset_clears_only_trip() {
        let storage = Storage::new(MemoryFlash::new(1024, 2));
        UploadCounters::increment(&storage).unwrap();
        UploadCounters::reset_trip(&storage).unwrap();
        assert_eq!(
            UploadCounters::load(&storage),
            UploadCounters { trip: 0, total: 1 }
        );
    }
}
