// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Advertised device name derived from the hardware id.
// Author: Lukas Bower

//! Device identity.

use core::fmt::Write as _;

use heapless::String as HeaplessString;
use slot_wire::{crc16_reflect, CRC_SEED, DEVICE_ID_POLY};

/// Longest advertised name.
pub const DEVICE_NAME_CAPACITY: usize = 32;

/// `<prefix>_<XXXX>` where `XXXX` is the CRC-16 of the hardware id in upper-case hex.
///
/// The prefix is shortened if the full name would not fit.
pub fn device_name(prefix: &str, hardware_id: &[u8; 8]) -> HeaplessString<DEVICE_NAME_CAPACITY> {
    let suffix = crc16_reflect(DEVICE_ID_POLY, CRC_SEED, hardware_id);
    let mut name = HeaplessString::new();
    for ch in prefix.chars() {
        if name.len() + ch.len_utf8() > DEVICE_NAME_CAPACITY - 5 {
            break;
        }
        let _ = name.push(ch);
    }
    let _ = write!(name, "_{suffix:04X}");
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_is_crc_of_hardware_id() {
        let name = device_name("SlotVM", &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(name.as_str(), "SlotVM_25C5");
    }

    #[test]
    fn long_prefix_is_shortened() {
        let prefix = "X".repeat(40);
        let name = device_name(&prefix, &[0; 8]);
        assert_eq!(name.len(), DEVICE_NAME_CAPACITY);
        let suffix = crc16_reflect(DEVICE_ID_POLY, CRC_SEED, &[0; 8]);
        assert!(name.ends_with(&format!("_{suffix:04X}")));
    }
}
