// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Chunk header, DATA and PROGRAM chunk layouts with decode and encode helpers.
// Author: Lukas Bower

//! Chunk layouts for the upload characteristic.

use core::fmt;

use crate::PROTOCOL_VERSION;

/// Size of the `version` + `command` header.
pub const HEADER_LEN: usize = 2;
/// Size of a DATA chunk before its payload (`header`, `offset`, `size`).
pub const DATA_HEADER_LEN: usize = HEADER_LEN + 2 + 2;
/// Exact size of a PROGRAM chunk (`header`, `length`, `checksum`, `slot`, `reserved`).
pub const PROGRAM_CHUNK_LEN: usize = HEADER_LEN + 2 + 2 + 1 + 1;

/// Commands understood by the upload characteristic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// Stage a slice of the image (`'D'`).
    Data,
    /// Verify and persist the staged image (`'P'`).
    Program,
    /// Software reset of the whole device (`'R'`).
    Reset,
    /// Restart the script runtime (`'L'`).
    Reload,
}

impl Command {
    /// Wire byte for the command.
    #[must_use]
    pub const fn byte(self) -> u8 {
        match self {
            Self::Data => b'D',
            Self::Program => b'P',
            Self::Reset => b'R',
            Self::Reload => b'L',
        }
    }

    /// Decode a wire byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'D' => Some(Self::Data),
            b'P' => Some(Self::Program),
            b'R' => Some(Self::Reset),
            b'L' => Some(Self::Reload),
            _ => None,
        }
    }
}

/// Two byte header present on every chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkHeader {
    /// Protocol version byte.
    pub version: u8,
    /// Raw command byte; see [`Command::from_byte`].
    pub command: u8,
}

impl ChunkHeader {
    /// Read the header from the start of `buf`.
    pub fn parse(buf: &[u8]) -> Result<Self, WireError> {
        match buf {
            [version, command, ..] => Ok(Self {
                version: *version,
                command: *command,
            }),
            _ => Err(WireError::Truncated { len: buf.len() }),
        }
    }

    /// Header for the supplied command at the current protocol version.
    #[must_use]
    pub const fn for_command(command: Command) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            command: command.byte(),
        }
    }
}

/// DATA chunk: `payload` belongs at `offset` of the staging buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DataChunk<'a> {
    /// Destination offset inside the staging buffer.
    pub offset: u16,
    /// Bytes to stage.
    pub payload: &'a [u8],
}

impl DataChunk<'_> {
    /// One past the last staging byte written by this chunk.
    #[must_use]
    pub fn end(&self) -> usize {
        usize::from(self.offset) + self.payload.len()
    }

    /// Encoded size of this chunk.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        DATA_HEADER_LEN + self.payload.len()
    }
}

/// PROGRAM chunk: finalise `length` staged bytes into `slot`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProgramChunk {
    /// Number of staged bytes that make up the image.
    pub length: u16,
    /// CRC-16 of the first `length` staged bytes.
    pub checksum: u16,
    /// Target slot number.
    pub slot: u8,
    /// Reserved, sent as zero.
    pub reserved: u8,
}

impl ProgramChunk {
    /// Encode into the fixed wire layout.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; PROGRAM_CHUNK_LEN] {
        let header = ChunkHeader::for_command(Command::Program);
        let length = self.length.to_le_bytes();
        let checksum = self.checksum.to_le_bytes();
        [
            header.version,
            header.command,
            length[0],
            length[1],
            checksum[0],
            checksum[1],
            self.slot,
            self.reserved,
        ]
    }
}

/// A decoded chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Chunk<'a> {
    /// Staging data.
    Data(DataChunk<'a>),
    /// Finalise request.
    Program(ProgramChunk),
    /// Reboot request.
    Reset,
    /// Reload request.
    Reload,
}

/// Errors produced while decoding or encoding chunks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WireError {
    /// Fewer bytes than the fixed part of the chunk.
    Truncated {
        /// Received length.
        len: usize,
    },
    /// Header version differs from [`PROTOCOL_VERSION`].
    VersionMismatch(u8),
    /// Command byte is not one of the known commands.
    UnknownCommand(u8),
    /// DATA chunk `size` field disagrees with the received length.
    DataSizeMismatch {
        /// Length implied by the header fields.
        declared: usize,
        /// Received length.
        actual: usize,
    },
    /// PROGRAM chunk was not exactly [`PROGRAM_CHUNK_LEN`] bytes.
    ProgramSizeMismatch {
        /// Received length.
        actual: usize,
    },
    /// Encoding target buffer is too small.
    BufferTooSmall {
        /// Bytes required.
        needed: usize,
        /// Bytes available.
        available: usize,
    },
    /// Payload cannot be described by a `u16` size field.
    PayloadTooLarge(usize),
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { len } => write!(f, "truncated chunk ({len} bytes)"),
            Self::VersionMismatch(version) => write!(f, "version mismatch (0x{version:02x})"),
            Self::UnknownCommand(byte) => write!(f, "unknown command 0x{byte:02x}"),
            Self::DataSizeMismatch { declared, actual } => {
                write!(f, "data size mismatch: declared {declared} actual {actual}")
            }
            Self::ProgramSizeMismatch { actual } => {
                write!(f, "program chunk size mismatch: {actual} bytes")
            }
            Self::BufferTooSmall { needed, available } => {
                write!(f, "buffer too small: need {needed} have {available}")
            }
            Self::PayloadTooLarge(len) => write!(f, "payload of {len} bytes exceeds u16"),
        }
    }
}

fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

/// Decode one chunk. Never reads past `buf` regardless of the header fields.
pub fn decode(buf: &[u8]) -> Result<Chunk<'_>, WireError> {
    let header = ChunkHeader::parse(buf)?;
    if header.version != PROTOCOL_VERSION {
        return Err(WireError::VersionMismatch(header.version));
    }
    match Command::from_byte(header.command) {
        Some(Command::Data) => {
            if buf.len() < DATA_HEADER_LEN {
                return Err(WireError::DataSizeMismatch {
                    declared: DATA_HEADER_LEN,
                    actual: buf.len(),
                });
            }
            let offset = read_u16(buf, HEADER_LEN);
            let size = usize::from(read_u16(buf, HEADER_LEN + 2));
            let declared = DATA_HEADER_LEN + size;
            if declared != buf.len() {
                return Err(WireError::DataSizeMismatch {
                    declared,
                    actual: buf.len(),
                });
            }
            Ok(Chunk::Data(DataChunk {
                offset,
                payload: &buf[DATA_HEADER_LEN..],
            }))
        }
        Some(Command::Program) => {
            if buf.len() != PROGRAM_CHUNK_LEN {
                return Err(WireError::ProgramSizeMismatch { actual: buf.len() });
            }
            Ok(Chunk::Program(ProgramChunk {
                length: read_u16(buf, HEADER_LEN),
                checksum: read_u16(buf, HEADER_LEN + 2),
                slot: buf[HEADER_LEN + 4],
                reserved: buf[HEADER_LEN + 5],
            }))
        }
        Some(Command::Reset) => Ok(Chunk::Reset),
        Some(Command::Reload) => Ok(Chunk::Reload),
        None => Err(WireError::UnknownCommand(header.command)),
    }
}

/// Encode a DATA chunk into `out`, returning the number of bytes written.
pub fn encode_data(offset: u16, payload: &[u8], out: &mut [u8]) -> Result<usize, WireError> {
    let size = u16::try_from(payload.len()).map_err(|_| WireError::PayloadTooLarge(payload.len()))?;
    let needed = DATA_HEADER_LEN + payload.len();
    if out.len() < needed {
        return Err(WireError::BufferTooSmall {
            needed,
            available: out.len(),
        });
    }
    let header = ChunkHeader::for_command(Command::Data);
    out[0] = header.version;
    out[1] = header.command;
    out[2..4].copy_from_slice(&offset.to_le_bytes());
    out[4..6].copy_from_slice(&size.to_le_bytes());
    out[DATA_HEADER_LEN..needed].copy_from_slice(payload);
    Ok(needed)
}

/// Encode a PROGRAM chunk for `slot`.
#[must_use]
pub fn encode_program(length: u16, checksum: u16, slot: u8) -> [u8; PROGRAM_CHUNK_LEN] {
    ProgramChunk {
        length,
        checksum,
        slot,
        reserved: 0,
    }
    .to_bytes()
}

/// Encode a header-only chunk (RESET, RELOAD).
#[must_use]
pub fn encode_simple(command: Command) -> [u8; HEADER_LEN] {
    let header = ChunkHeader::for_command(command);
    [header.version, header.command]
}

/// Split `image` into DATA chunks no larger than `max_chunk_len` encoded bytes.
///
/// Pieces past offset `u16::MAX` are not produced.
#[must_use]
pub fn split_image(image: &[u8], max_chunk_len: usize) -> DataPieces<'_> {
    DataPieces {
        image,
        piece: max_chunk_len.saturating_sub(DATA_HEADER_LEN).max(1),
        next: 0,
    }
}

/// Iterator returned by [`split_image`].
#[derive(Clone, Debug)]
pub struct DataPieces<'a> {
    image: &'a [u8],
    piece: usize,
    next: usize,
}

impl<'a> Iterator for DataPieces<'a> {
    type Item = DataChunk<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.image.len() {
            return None;
        }
        let offset = u16::try_from(self.next).ok()?;
        let end = self.image.len().min(self.next + self.piece);
        let payload = &self.image[self.next..end];
        self.next = end;
        Some(DataChunk { offset, payload })
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::vec::Vec;

    use super::*;

    #[test]
    fn data_chunk_decodes_payload_slice() {
        let mut buf = [0u8; 16];
        let len = encode_data(3, &[9, 8, 7], &mut buf).unwrap();
        assert_eq!(len, DATA_HEADER_LEN + 3);
        let Chunk::Data(chunk) = decode(&buf[..len]).unwrap() else {
            panic!("expected data chunk");
        };
        assert_eq!(chunk.offset, 3);
        assert_eq!(chunk.payload, &[9, 8, 7]);
        assert_eq!(chunk.end(), 6);
    }

    #[test]
    fn data_chunk_with_trailing_garbage_is_rejected() {
        let mut buf = [0u8; 16];
        let len = encode_data(0, &[1, 2], &mut buf).unwrap();
        assert_eq!(
            decode(&buf[..len + 1]),
            Err(WireError::DataSizeMismatch {
                declared: len,
                actual: len + 1
            })
        );
    }

    #[test]
    fn short_inputs_never_panic() {
        assert_eq!(decode(&[]), Err(WireError::Truncated { len: 0 }));
        assert_eq!(decode(&[PROTOCOL_VERSION]), Err(WireError::Truncated { len: 1 }));
        assert!(matches!(
            decode(&[PROTOCOL_VERSION, b'D', 0]),
            Err(WireError::DataSizeMismatch { actual: 3, .. })
        ));
        assert_eq!(
            decode(&[PROTOCOL_VERSION, b'P', 0, 0]),
            Err(WireError::ProgramSizeMismatch { actual: 4 })
        );
    }

    #[test]
    fn version_and_command_are_checked() {
        assert_eq!(decode(&[0x02, b'L']), Err(WireError::VersionMismatch(0x02)));
        assert_eq!(
            decode(&[PROTOCOL_VERSION, b'X']),
            Err(WireError::UnknownCommand(b'X'))
        );
        assert_eq!(decode(&encode_simple(Command::Reload)), Ok(Chunk::Reload));
        assert_eq!(decode(&encode_simple(Command::Reset)), Ok(Chunk::Reset));
    }

    #[test]
    fn program_chunk_layout_is_little_endian() {
        let bytes = encode_program(0x1234, 0xBEEF, 2);
        assert_eq!(bytes, [PROTOCOL_VERSION, b'P', 0x34, 0x12, 0xEF, 0xBE, 2, 0]);
        assert_eq!(
            decode(&bytes),
            Ok(Chunk::Program(ProgramChunk {
                length: 0x1234,
                checksum: 0xBEEF,
                slot: 2,
                reserved: 0,
            }))
        );
    }

    #[test]
    fn split_respects_chunk_budget() {
        let image = [0xAAu8; 25];
        let pieces: Vec<_> = split_image(&image, DATA_HEADER_LEN + 10).collect();
        assert_eq!(pieces.len(), 3);
        assert_eq!(pieces[0].offset, 0);
        assert_eq!(pieces[1].offset, 10);
        assert_eq!(pieces[2].offset, 20);
        assert_eq!(pieces[2].payload.len(), 5);
    }

    #[test]
    fn encode_rejects_small_buffer() {
        let mut buf = [0u8; 4];
        assert_eq!(
            encode_data(0, &[1, 2, 3], &mut buf),
            Err(WireError::BufferTooSmall {
                needed: 9,
                available: 4
            })
        );
    }
}
