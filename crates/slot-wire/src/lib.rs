// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Defines the slot-wire library and public module surface.
// Author: Lukas Bower
#![no_std]
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Wire representation of the chunked bytecode upload protocol.
//!
//! Every message written to the program characteristic starts with a two byte
//! header (`version`, `command`). DATA chunks carry a slice of the image at a
//! caller chosen offset, PROGRAM chunks finalise the upload with a CRC-16 over
//! the staged bytes. All multi-byte fields are little-endian. Responses travel
//! back as short ASCII notification lines (`OK slot:N` / `ERROR: ...`).
//!
//! The crate is shared by the device side decoder and by uploaders that need
//! to split an image into chunks, so it stays allocation free.

mod chunk;
mod notice;

pub use chunk::{
    decode, encode_data, encode_program, encode_simple, split_image, Chunk, ChunkHeader, Command,
    DataChunk, DataPieces, ProgramChunk, WireError, DATA_HEADER_LEN, HEADER_LEN, PROGRAM_CHUNK_LEN,
};
pub use notice::{parse_notice, render_notice, Notice, ParsedNotice, Rejection};

/// Protocol version carried in every chunk header.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Reflected polynomial used for the PROGRAM chunk checksum.
pub const CHECKSUM_POLY: u16 = 0xD175;

/// Reflected polynomial used when deriving the advertised device suffix.
pub const DEVICE_ID_POLY: u16 = 0x9EB2;

/// Seed shared by both CRC-16 variants.
pub const CRC_SEED: u16 = 0xFFFF;

/// Reflected CRC-16 with a caller supplied polynomial and seed, no final xor.
///
/// The polynomial is given in its reflected (LSB-first) form and is applied
/// as-is on every right shift.
#[must_use]
pub const fn crc16_reflect(poly: u16, seed: u16, data: &[u8]) -> u16 {
    let mut crc = seed;
    let mut index = 0;
    while index < data.len() {
        crc ^= data[index] as u16;
        let mut bit = 0;
        while bit < 8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ poly;
            } else {
                crc >>= 1;
            }
            bit += 1;
        }
        index += 1;
    }
    crc
}

/// Checksum a client must place in the PROGRAM chunk for `image`.
#[must_use]
pub const fn image_checksum(image: &[u8]) -> u16 {
    crc16_reflect(CHECKSUM_POLY, CRC_SEED, image)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_returns_seed() {
        assert_eq!(image_checksum(&[]), CRC_SEED);
    }

    #[test]
    fn checksum_matches_reference_vector() {
        assert_eq!(image_checksum(b"123456789"), 0x97DE);
        assert_eq!(image_checksum(&[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]), 0xB03F);
    }

    #[test]
    fn zero_bytes_change_the_checksum() {
        assert_eq!(image_checksum(&[0, 0, 0]), 0x2DB2);
        assert_ne!(image_checksum(&[0, 0, 0]), image_checksum(&[0, 0]));
    }

    #[test]
    fn device_id_polynomial_vector() {
        let id = [1u8, 2, 3, 4, 5, 6, 7, 8];
        assert_eq!(crc16_reflect(DEVICE_ID_POLY, CRC_SEED, &id), 0x25C5);
    }
}
