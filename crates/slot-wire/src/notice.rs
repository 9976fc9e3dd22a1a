// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Notification line grammar returned on the upload characteristic.
// Author: Lukas Bower

//! `OK slot:N` / `ERROR: <reason>` notification lines.

use core::fmt::Write;

/// Reasons an upload chunk was rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rejection {
    /// Header version differs from the supported version.
    VersionMismatch,
    /// Chunk shorter than its two byte header.
    Truncated,
    /// DATA chunk size field disagrees with the received length.
    DataSize,
    /// Offset + size or PROGRAM length exceeds the staging capacity.
    SizeExceedsBuffer,
    /// PROGRAM chunk was not exactly the fixed size.
    ProgramSize,
    /// Checksum over the staged bytes did not match.
    CrcMismatch,
    /// The verified image could not be persisted.
    StoreFailed,
    /// PROGRAM chunk targeted a slot other than 1 or 2.
    InvalidSlot,
    /// Another connection owns the in-flight upload.
    SessionBusy,
    /// Command byte not recognised.
    UnknownCommand,
}

impl Rejection {
    /// Human readable reason carried after `ERROR: `.
    #[must_use]
    pub const fn text(self) -> &'static str {
        match self {
            Self::VersionMismatch => "Version mismatch",
            Self::Truncated => "Truncated chunk",
            Self::DataSize => "Data size error",
            Self::SizeExceedsBuffer => "Size exceeds buffer limits",
            Self::ProgramSize => "Program size mismatch",
            Self::CrcMismatch => "CRC mismatch",
            Self::StoreFailed => "Program store error",
            Self::InvalidSlot => "Invalid slot",
            Self::SessionBusy => "Upload session busy",
            Self::UnknownCommand => "Unknown command",
        }
    }
}

/// Notification emitted after processing a chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Notice {
    /// Image verified and stored in `slot`.
    Stored {
        /// Slot number that received the image.
        slot: u8,
    },
    /// Chunk rejected.
    Rejected(Rejection),
}

/// Render a notification line using the standard grammar.
pub fn render_notice<W: Write>(w: &mut W, notice: &Notice) -> core::fmt::Result {
    match notice {
        Notice::Stored { slot } => write!(w, "OK slot:{slot}"),
        Notice::Rejected(reason) => {
            w.write_str("ERROR: ")?;
            w.write_str(reason.text())
        }
    }
}

/// Parsed notification line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParsedNotice<'a> {
    /// `OK slot:N`.
    Stored {
        /// Slot number reported by the device.
        slot: u8,
    },
    /// `ERROR: <reason>`.
    Error(&'a str),
}

/// Parse a notification line produced by [`render_notice`].
pub fn parse_notice(line: &str) -> Option<ParsedNotice<'_>> {
    let trimmed = line.trim();
    if let Some(rest) = trimmed.strip_prefix("OK slot:") {
        return rest.parse().ok().map(|slot| ParsedNotice::Stored { slot });
    }
    trimmed
        .strip_prefix("ERROR:")
        .map(|reason| ParsedNotice::Error(reason.trim()))
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::string::String;

    use super::*;

    fn render(notice: Notice) -> String {
        let mut line = String::new();
        render_notice(&mut line, &notice).unwrap();
        line
    }

    #[test]
    fn stored_notice_names_slot() {
        assert_eq!(render(Notice::Stored { slot: 1 }), "OK slot:1");
    }

    #[test]
    fn rejection_renders_reason() {
        assert_eq!(
            render(Notice::Rejected(Rejection::SizeExceedsBuffer)),
            "ERROR: Size exceeds buffer limits"
        );
    }

    #[test]
    fn parse_round_trips_device_lines() {
        assert_eq!(
            parse_notice("OK slot:2\n"),
            Some(ParsedNotice::Stored { slot: 2 })
        );
        assert_eq!(
            parse_notice(&render(Notice::Rejected(Rejection::CrcMismatch))),
            Some(ParsedNotice::Error("CRC mismatch"))
        );
        assert_eq!(parse_notice("OK slot:x"), None);
        assert_eq!(parse_notice("hello"), None);
    }
}
