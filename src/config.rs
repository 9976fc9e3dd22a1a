// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Firmware configuration sections, defaults and validation.
// Author: Lukas Bower

//! Runtime configuration for the slot VM firmware.
//!
//! Every section has defaults matching the production board, so an empty
//! document is a valid configuration. Host builds can load overrides from TOML.

use serde::Deserialize;
use static_assertions::const_assert;

use crate::error::ConfigError;

/// Capacity of the staging buffer and of each slot's load buffer.
pub const MAX_BYTECODE_SIZE: usize = 8000;

/// Capacity of the compression scratch buffer.
pub const COMPRESSED_CAPACITY: usize = 8192;

/// Largest hardware watchdog window the timer supports.
pub const WATCHDOG_MAX_WINDOW_MS: u32 = 10_000;

/// Smallest window with a non-zero check period (`window / 4`).
pub const WATCHDOG_MIN_WINDOW_MS: u32 = 4;

const MIN_HEAP_BYTES: usize = 1024;

const_assert!(MAX_BYTECODE_SIZE <= u16::MAX as usize);
const_assert!(COMPRESSED_CAPACITY >= MAX_BYTECODE_SIZE);

/// Top-level configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FirmwareConfig {
    /// Advertised identity.
    pub device: DeviceConfig,
    /// Flash partition sizing.
    pub storage: StorageConfig,
    /// Script runtime parameters.
    pub vm: VmConfig,
    /// Watchdog window.
    pub watchdog: WatchdogConfig,
    /// Wireless transport parameters.
    pub transport: TransportConfig,
}

/// Advertised identity.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceConfig {
    /// Prefix of the advertised name; a CRC-derived suffix is appended.
    pub name_prefix: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name_prefix: "SlotVM".into(),
        }
    }
}

/// Flash partition sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Bytes available to the key-value partition.
    pub capacity_bytes: usize,
    /// Generations kept per id for history reads.
    pub history_depth: usize,
    /// Deflate level for stored images (0..=9).
    pub compression_level: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: 64 * 1024,
            history_depth: 4,
            compression_level: 1,
        }
    }
}

/// Script runtime parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VmConfig {
    /// Size of the heap arena handed to the engine on every cycle.
    pub heap_bytes: usize,
    /// Period of the scheduler tick.
    pub tick_ms: u32,
    /// Scheduling priority of slot 1 (lower value runs first).
    pub slot1_priority: u8,
    /// Scheduling priority of slot 2.
    pub slot2_priority: u8,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            heap_bytes: 15 * 1024,
            tick_ms: 1,
            slot1_priority: 1,
            slot2_priority: 2,
        }
    }
}

/// Hardware watchdog window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatchdogConfig {
    /// Maximum time between feeds before the hardware resets the device.
    pub window_ms: u32,
}

impl WatchdogConfig {
    /// Interval between liveness checks.
    #[must_use]
    pub const fn check_period_ms(&self) -> u32 {
        self.window_ms / 4
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            window_ms: WATCHDOG_MAX_WINDOW_MS,
        }
    }
}

/// Wireless transport parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransportConfig {
    /// Negotiated transfer unit reported on the status characteristic.
    pub mtu: u16,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self { mtu: 247 }
    }
}

impl FirmwareConfig {
    /// Parse a TOML document and validate it.
    #[cfg(not(target_os = "none"))]
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject combinations the firmware cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.watchdog.window_ms < WATCHDOG_MIN_WINDOW_MS {
            return Err(ConfigError::Invalid {
                field: "watchdog.window_ms",
                reason: "must be at least 4 ms",
            });
        }
        if self.watchdog.window_ms > WATCHDOG_MAX_WINDOW_MS {
            return Err(ConfigError::Invalid {
                field: "watchdog.window_ms",
                reason: "exceeds hardware maximum of 10000 ms",
            });
        }
        if self.vm.heap_bytes < MIN_HEAP_BYTES {
            return Err(ConfigError::Invalid {
                field: "vm.heap_bytes",
                reason: "must be at least 1024",
            });
        }
        if self.vm.tick_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "vm.tick_ms",
                reason: "must be non-zero",
            });
        }
        if self.vm.slot2_priority <= self.vm.slot1_priority {
            return Err(ConfigError::Invalid {
                field: "vm.slot2_priority",
                reason: "slot 1 must run at a higher priority than slot 2",
            });
        }
        if usize::from(self.transport.mtu) < slot_wire::PROGRAM_CHUNK_LEN {
            return Err(ConfigError::Invalid {
                field: "transport.mtu",
                reason: "smaller than a PROGRAM chunk",
            });
        }
        if self.storage.history_depth == 0 {
            return Err(ConfigError::Invalid {
                field: "storage.history_depth",
                reason: "must keep at least the current generation",
            });
        }
        if self.storage.compression_level > 9 {
            return Err(ConfigError::Invalid {
                field: "storage.compression_level",
                reason: "must be between 0 and 9",
            });
        }
        if self.device.name_prefix.is_empty() {
            return Err(ConfigError::Invalid {
                field: "device.name_prefix",
                reason: "must not be empty",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = FirmwareConfig::default();
        config.validate().unwrap();
        assert_eq!(config.watchdog.check_period_ms(), 2_500);
    }

    #[test]
    fn empty_document_uses_defaults() {
        assert_eq!(
            FirmwareConfig::from_toml_str("").unwrap(),
            FirmwareConfig::default()
        );
    }

    #[test]
    fn overrides_apply_per_section() {
        let config = FirmwareConfig::from_toml_str(
            "[watchdog]\nwindow_ms = 4000\n[device]\nname_prefix = \"Bench\"\n",
        )
        .unwrap();
        assert_eq!(config.watchdog.window_ms, 4_000);
        assert_eq!(config.device.name_prefix, "Bench");
        assert_eq!(config.vm, VmConfig::default());
    }

    #[test]
    fn compression_level_is_bounded() {
        let config = FirmwareConfig::from_toml_str("[storage]\ncompression_level = 9\n").unwrap();
        assert_eq!(config.storage.compression_level, 9);
        assert!(FirmwareConfig::from_toml_str("[storage]\ncompression_level = 10\n").is_err());
    }

    #[test]
    fn oversized_window_rejected() {
        let err = FirmwareConfig::from_toml_str("[watchdog]\nwindow_ms = 20000\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "watchdog.window_ms",
                ..
            }
        ));
    }

    #[test]
    fn window_below_four_checks_rejected() {
        for window in [0, 3] {
            let err = FirmwareConfig::from_toml_str(&format!("[watchdog]\nwindow_ms = {window}\n"))
                .unwrap_err();
            assert!(matches!(
                err,
                ConfigError::Invalid {
                    field: "watchdog.window_ms",
                    ..
                }
            ));
        }
        FirmwareConfig::from_toml_str("[watchdog]\nwindow_ms = 4\n").unwrap();
    }

    #[test]
    fn inverted_priorities_rejected() {
        let err = FirmwareConfig::from_toml_str("[vm]\nslot1_priority = 3\nslot2_priority = 2\n")
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "vm.slot2_priority",
                ..
            }
        ));
    }

    #[test]
    fn unknown_keys_are_parse_errors() {
        assert!(matches!(
            FirmwareConfig::from_toml_str("[vm]\nturbo = true\n"),
            Err(ConfigError::Parse(_))
        ));
    }
}
