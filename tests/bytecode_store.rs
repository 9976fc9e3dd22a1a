// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Bytecode store persistence, history and counter behaviour over simulated flash.
// Author: Lukas Bower

use slotvm::bytecode::{BytecodeStore, ImageSource, Slot};
use slotvm::config::{COMPRESSED_CAPACITY, MAX_BYTECODE_SIZE};
use slotvm::error::{BytecodeError, CodecError, StorageError};
use slotvm::storage::{MemoryFlash, Storage, StorageId};

fn store() -> BytecodeStore<MemoryFlash> {
    BytecodeStore::new(Storage::new(MemoryFlash::new(64 * 1024, 3)))
}

/// Deterministic bytes that deflate cannot shrink much.
fn noise(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            (state >> 16) as u8
        })
        .collect()
}

#[test]
fn images_round_trip_across_the_supported_range() {
    let store = store();
    let mut out = vec![0u8; MAX_BYTECODE_SIZE];
    for len in [0, 1, 2, 10, 255, 256, 1024, 4097, 7999, MAX_BYTECODE_SIZE] {
        for (slot, image) in [(Slot::One, noise(len, len as u32)), (Slot::Two, vec![0x42; len])] {
            store.store(slot, &image).unwrap();
            out.fill(0xAA);
            let loaded = store.load(slot, &mut out).unwrap();
            assert_eq!(loaded, len, "{slot} len {len}");
            assert_eq!(&out[..len], &image[..], "{slot} len {len}");
        }
    }
}

#[test]
fn slots_are_independent() {
    let store = store();
    store.store(Slot::One, b"first").unwrap();
    store.store(Slot::Two, b"second image").unwrap();
    store.delete(Slot::One).unwrap();

    let mut out = [0u8; 32];
    assert!(store.load(Slot::One, &mut out).is_err());
    assert_eq!(store.load(Slot::Two, &mut out).unwrap(), 12);
    assert_eq!(&out[..12], b"second image");
}

#[test]
fn image_source_reports_compressed_length() {
    let store = store();
    let image = vec![7u8; 4000];
    store.store(Slot::Two, &image).unwrap();
    let stored = ImageSource::stored_len(&store, Slot::Two).unwrap();
    assert!(stored > 0 && stored < image.len());
    assert_eq!(stored, store.length(Slot::Two).unwrap());
}

#[test]
fn undersized_load_buffer_fails() {
    let store = store();
    store.store(Slot::One, &noise(600, 9)).unwrap();
    let mut out = [0u8; 100];
    assert!(matches!(
        store.load(Slot::One, &mut out),
        Err(BytecodeError::Codec(CodecError::DestinationTooSmall { .. }))
    ));
}

#[test]
fn missing_image_reports_not_found() {
    let store = store();
    let mut out = [0u8; 16];
    assert!(matches!(
        store.load(Slot::Two, &mut out),
        Err(BytecodeError::Storage(StorageError::NotFound { .. }))
    ));
    assert!(store.length(Slot::Two).is_err());
}

#[test]
fn previous_generations_remain_readable() {
    let store = store();
    store.store(Slot::One, b"v1").unwrap();
    store.store(Slot::One, b"v2").unwrap();
    store.store(Slot::One, b"v3").unwrap();
    store.store(Slot::One, b"v4").unwrap();

    let storage = store.storage();
    let id = Slot::One.storage_id();
    assert_eq!(storage.backend().generations(id), 3);
    let mut newest = [0u8; 64];
    let mut oldest = [0u8; 64];
    let newest_len = storage.read_at_generation(id, 0, &mut newest).unwrap();
    let oldest_len = storage.read_at_generation(id, 2, &mut oldest).unwrap();
    assert_ne!(&newest[..newest_len], &oldest[..oldest_len]);
    assert!(storage.read_at_generation(id, 3, &mut oldest).is_err());
}

#[test]
fn counters_track_every_successful_store() {
    let store = store();
    for round in 0..5u8 {
        store.store(Slot::One, &[round; 20]).unwrap();
    }
    store.store(Slot::Two, &[9; 20]).unwrap();
    let counters = store.counters();
    assert_eq!((counters.trip, counters.total), (6, 6));

    store.factory_reset().unwrap();
    let counters = store.counters();
    assert_eq!((counters.trip, counters.total), (0, 6));
    let mut out = [0u8; 32];
    assert!(store.load(Slot::One, &mut out).is_err());
    assert!(store.load(Slot::Two, &mut out).is_err());
}

#[test]
fn flash_exhaustion_is_a_storage_error() {
    let store = BytecodeStore::new(Storage::new(MemoryFlash::new(512, 1)));
    assert!(matches!(
        store.store(Slot::One, &noise(2000, 3)),
        Err(BytecodeError::Storage(StorageError::NoSpace { .. }))
    ));
    assert_eq!(store.counters().total, 0);
}

#[test]
fn image_write_commits_even_if_counters_fail() {
    let store = store();
    store
        .storage()
        .backend()
        .set_write_failure_for(Some(StorageId::TRIP_COUNT));
    store.store(Slot::One, b"committed").unwrap();

    let mut out = [0u8; 16];
    assert_eq!(store.load(Slot::One, &mut out).unwrap(), 9);
    assert_eq!(&out[..9], b"committed");
    assert_eq!(store.counters().total, 0);

    store.storage().backend().set_write_failure_for(None);
    store.store(Slot::One, b"next").unwrap();
    let counters = store.counters();
    assert_eq!((counters.trip, counters.total), (1, 1));
}

#[test]
fn incompressible_max_size_image_stays_within_scratch() {
    let store = store();
    let image = noise(MAX_BYTECODE_SIZE, 77);
    store.store(Slot::Two, &image).unwrap();
    let stored = store.length(Slot::Two).unwrap();
    assert!(stored > MAX_BYTECODE_SIZE && stored <= COMPRESSED_CAPACITY);
    let mut out = vec![0u8; MAX_BYTECODE_SIZE];
    assert_eq!(store.load(Slot::Two, &mut out).unwrap(), MAX_BYTECODE_SIZE);
    assert_eq!(out, image);
}
