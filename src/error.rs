// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Error types shared by the firmware subsystems.
// Author: Lukas Bower

//! Subsystem error enums.

use thiserror::Error;

use crate::storage::StorageId;

/// Errors raised by the flash key-value layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// No value is stored under the id (or at the requested generation).
    #[error("no entry for id {id} at generation {generation}")]
    NotFound {
        /// Storage id that was requested.
        id: StorageId,
        /// History generation that was requested.
        generation: u16,
    },
    /// The destination buffer cannot hold the stored value.
    #[error("entry {id} holds {stored} bytes but buffer has {capacity}")]
    BufferTooSmall {
        /// Storage id that was requested.
        id: StorageId,
        /// Stored length.
        stored: usize,
        /// Caller buffer capacity.
        capacity: usize,
    },
    /// The flash partition has no room for the value.
    #[error("flash full: need {needed} bytes, {free} free")]
    NoSpace {
        /// Bytes required for the write.
        needed: usize,
        /// Bytes currently free.
        free: usize,
    },
    /// The underlying device reported a failure.
    #[error("flash device error: {0}")]
    Device(&'static str),
}

/// Errors raised by the compression codec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Compressed form would not fit the scratch capacity.
    #[error("compressed output exceeds {capacity} bytes")]
    OutputOverflow {
        /// Capacity of the destination.
        capacity: usize,
    },
    /// Input was not a valid compressed stream or was truncated.
    #[error("corrupt compressed stream")]
    Corrupt,
    /// Decompressed data does not fit the destination buffer.
    #[error("decompressed image exceeds {capacity} bytes")]
    DestinationTooSmall {
        /// Capacity of the destination.
        capacity: usize,
    },
}

/// Errors raised by the bytecode store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BytecodeError {
    /// Slot number outside `1..=2`.
    #[error("invalid slot {0}")]
    InvalidSlot(u8),
    /// Image larger than the load buffer capacity.
    #[error("image of {len} bytes exceeds {max} byte limit")]
    ImageTooLarge {
        /// Image length.
        len: usize,
        /// Maximum supported length.
        max: usize,
    },
    /// Flash access failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// Compression or decompression failed.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Errors raised by a script engine implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Heap arena could not satisfy an allocation.
    #[error("script heap exhausted ({requested} bytes requested)")]
    OutOfMemory {
        /// Requested size.
        requested: usize,
    },
    /// Engine rejected the bytecode image.
    #[error("bytecode rejected: {0}")]
    InvalidBytecode(&'static str),
    /// A class or symbol could not be registered.
    #[error("registration of {0} failed")]
    Registration(&'static str),
    /// Engine used before `init`.
    #[error("engine not initialised")]
    NotInitialised,
    /// Operation reserved for the system task.
    #[error("{0} is restricted to the system task")]
    Unauthorized(&'static str),
}

/// Errors raised by the hardware watchdog driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WatchdogError {
    /// Timer rejected the requested window.
    #[error("watchdog window {0} ms out of range")]
    Window(u32),
    /// Timer refused the feed.
    #[error("watchdog feed failed: {0}")]
    Feed(&'static str),
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// TOML text could not be parsed.
    #[error("config parse error: {0}")]
    Parse(String),
    /// A field failed validation.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Dotted field path.
        field: &'static str,
        /// Why the value was rejected.
        reason: &'static str,
    },
}
