// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Bounded buffer-to-buffer compression codec for stored bytecode images.
// Author: Lukas Bower

//! Compression codec used by the bytecode store.
//!
//! Both directions work on caller supplied fixed buffers; nothing grows.

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::error::CodecError;

/// Buffer-to-buffer compression.
pub trait Codec: Send + Sync {
    /// Compress `src` into `dst`, returning the compressed length.
    fn compress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize, CodecError>;

    /// Decompress `src` into `dst`, returning the decompressed length.
    fn decompress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize, CodecError>;
}

/// Raw deflate stream without zlib framing.
#[derive(Clone, Copy, Debug)]
pub struct DeflateCodec {
    level: Compression,
}

impl DeflateCodec {
    /// Codec at the given compression level (0..=9).
    #[must_use]
    pub fn with_level(level: u32) -> Self {
        Self {
            level: Compression::new(level.min(9)),
        }
    }
}

impl Default for DeflateCodec {
    fn default() -> Self {
        Self {
            level: Compression::fast(),
        }
    }
}

impl Codec for DeflateCodec {
    fn compress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize, CodecError> {
        let mut stream = Compress::new(self.level, false);
        let overflow = CodecError::OutputOverflow {
            capacity: dst.len(),
        };
        match stream.compress(src, dst, FlushCompress::Finish) {
            Ok(Status::StreamEnd) => usize::try_from(stream.total_out()).map_err(|_| overflow),
            _ => Err(overflow),
        }
    }

    fn decompress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize, CodecError> {
        let mut stream = Decompress::new(false);
        let status = stream
            .decompress(src, dst, FlushDecompress::Finish)
            .map_err(|_| CodecError::Corrupt)?;
        let produced = usize::try_from(stream.total_out()).map_err(|_| CodecError::Corrupt)?;
        let consumed = usize::try_from(stream.total_in()).map_err(|_| CodecError::Corrupt)?;
        let too_small = CodecError::DestinationTooSmall {
            capacity: dst.len(),
        };
        match status {
            Status::StreamEnd => Ok(produced),
            // An exactly full destination can still hold the whole stream.
            _ if produced == dst.len() => {
                match stream.decompress(&src[consumed..], &mut [], FlushDecompress::Finish) {
                    Ok(Status::StreamEnd) => Ok(produced),
                    _ => Err(too_small),
                }
            }
            _ if consumed < src.len() => Err(too_small),
            _ => Err(CodecError::Corrupt),
        }
    }
}
