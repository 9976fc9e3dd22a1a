// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Per-cycle heap arena handed to the script engine.
// Author: Lukas Bower

//! Script heap arena.
//!
//! A fresh arena is created at INIT and dropped at TEARDOWN, so nothing a
//! script allocated survives into the next cycle.

#![allow(unsafe_code)]

use alloc::boxed::Box;
use alloc::vec;
use core::alloc::Layout;
use core::ptr::NonNull;

use linked_list_allocator::Heap;

use crate::error::EngineError;

const MIN_ARENA_BYTES: usize = 64;

/// Fixed-size heap owned by one supervisor cycle.
pub struct HeapArena {
    heap: Heap,
    // Backing store for `heap`; must outlive it and never move.
    _region: Box<[u8]>,
}

impl HeapArena {
    /// Arena of `bytes` zeroed bytes.
    pub fn new(bytes: usize) -> Result<Self, EngineError> {
        if bytes < MIN_ARENA_BYTES {
            return Err(EngineError::OutOfMemory { requested: bytes });
        }
        let mut region = vec![0u8; bytes].into_boxed_slice();
        let mut heap = Heap::empty();
        // SAFETY: `region` is exclusively owned by the arena, outlives `heap`
        // and its heap allocation does not move when the arena moves.
        unsafe {
            heap.init(region.as_mut_ptr(), region.len());
        }
        Ok(Self {
            heap,
            _region: region,
        })
    }

    /// Reserve `layout` from the arena.
    pub fn allocate(&mut self, layout: Layout) -> Result<NonNull<u8>, EngineError> {
        self.heap
            .allocate_first_fit(layout)
            .map_err(|()| EngineError::OutOfMemory {
                requested: layout.size(),
            })
    }

    /// Reserve `size` bytes with byte alignment.
    pub fn reserve(&mut self, size: usize) -> Result<NonNull<u8>, EngineError> {
        let layout = Layout::from_size_align(size.max(1), 1)
            .map_err(|_| EngineError::OutOfMemory { requested: size })?;
        self.allocate(layout)
    }

    /// Return a block obtained from [`HeapArena::allocate`].
    ///
    /// # Safety
    ///
    /// `ptr` must come from this arena with the same `layout` and must not be
    /// used afterwards.
    pub unsafe fn deallocate(&mut self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: forwarded caller contract.
        unsafe { self.heap.deallocate(ptr, layout) }
    }

    /// Total arena size.
    pub fn size(&self) -> usize {
        self.heap.size()
    }

    /// Bytes currently allocated.
    pub fn used(&self) -> usize {
        self.heap.used()
    }

    /// Bytes still free.
    pub fn free(&self) -> usize {
        self.heap.free()
    }
}
