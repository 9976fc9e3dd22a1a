// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Compiled-in fallback images used when a slot has no usable stored image.
// Author: Lukas Bower

//! Factory default images.

use crate::bytecode::Slot;

/// Fallback images per slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DefaultImages {
    /// Image run in slot 1.
    pub slot1: &'static [u8],
    /// Image run in slot 2.
    pub slot2: &'static [u8],
}

impl DefaultImages {
    /// Image for `slot`.
    #[must_use]
    pub const fn for_slot(&self, slot: Slot) -> &'static [u8] {
        match slot {
            Slot::One => self.slot1,
            Slot::Two => self.slot2,
        }
    }
}

/// Factory images for the host replay engine: slot 1 polls reload every
/// 250 ticks, slot 2 every 100.
pub const REPLAY_DEFAULTS: DefaultImages = DefaultImages {
    slot1: &[250],
    slot2: &[100],
};
