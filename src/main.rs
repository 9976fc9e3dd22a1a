// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Host entry point driving the simulated slotvm device.
// Author: Lukas Bower

//! `slotvm` host binary.
//!
//! Boots a simulated device, optionally uploads a bytecode image through the
//! chunked upload protocol, and runs the supervisor with the watchdog for a
//! fixed time.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use slot_wire::{encode_simple, Command};
use slotvm::config::FirmwareConfig;
use slotvm::host::HostDevice;
use slotvm::upload::WriteOutcome;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Firmware configuration TOML; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
    /// 8-byte hardware device id as 16 hex digits.
    #[arg(long, default_value = "0102030405060708")]
    hardware_id: String,
    #[command(subcommand)]
    command: Action,
}

#[derive(Debug, Subcommand)]
enum Action {
    /// Print the advertised device name.
    Name,
    /// Run the supervisor and watchdog.
    Run {
        /// Seconds to run before shutting down.
        #[arg(long, default_value_t = 5)]
        seconds: u64,
        /// Delete stored images and the trip counter first.
        #[arg(long)]
        factory_reset: bool,
    },
    /// Upload an image over the simulated link, then run it.
    Upload {
        /// Bytecode image to send.
        file: PathBuf,
        /// Target slot (1 or 2).
        #[arg(long, default_value_t = 1)]
        slot: u8,
        /// Send RELOAD after the image is stored.
        #[arg(long)]
        reload: bool,
        /// Seconds to run after the upload; 0 skips the run.
        #[arg(long, default_value_t = 0)]
        run_seconds: u64,
        /// Transfer unit to negotiate before sending.
        #[arg(long)]
        mtu: Option<u16>,
    },
}

fn parse_hardware_id(text: &str) -> Result<[u8; 8]> {
    if text.len() != 16 {
        bail!("hardware id must be 16 hex digits, got {}", text.len());
    }
    let mut id = [0u8; 8];
    for (index, byte) in id.iter_mut().enumerate() {
        let digits = text
            .get(index * 2..index * 2 + 2)
            .context("hardware id is not ASCII")?;
        *byte = u8::from_str_radix(digits, 16)
            .with_context(|| format!("invalid hex byte {digits:?}"))?;
    }
    Ok(id)
}

fn load_config(path: Option<&PathBuf>) -> Result<FirmwareConfig> {
    let Some(path) = path else {
        return Ok(FirmwareConfig::default());
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    FirmwareConfig::from_toml_str(&text).with_context(|| format!("invalid {}", path.display()))
}

fn run(device: &HostDevice, seconds: u64) -> Result<()> {
    let summary = device.run_for(Duration::from_secs(seconds))?;
    println!(
        "slotvm: {} cycles, {} watchdog feeds{}",
        summary.cycles,
        summary.feeds,
        if summary.expired { ", watchdog expired" } else { "" }
    );
    for line in device.notifier().console_lines() {
        println!("console: {line}");
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let config = load_config(args.config.as_ref())?;
    let device = HostDevice::new(config, parse_hardware_id(&args.hardware_id)?)?;
    info!("[comm] device {}", device.name());

    match args.command {
        Action::Name => println!("{}", device.name()),
        Action::Run {
            seconds,
            factory_reset,
        } => {
            if factory_reset {
                device.factory_reset()?;
            }
            run(&device, seconds)?;
        }
        Action::Upload {
            file,
            slot,
            reload,
            run_seconds,
            mtu,
        } => {
            let image =
                fs::read(&file).with_context(|| format!("failed to read {}", file.display()))?;
            let conn = device.connect();
            if let Some(mtu) = mtu {
                device.exchange_mtu(mtu)?;
            }
            let outcome = device.upload_image(conn, slot, &image)?;
            for line in device.notifier().program_lines() {
                println!("{line}");
            }
            if reload && matches!(outcome, WriteOutcome::Stored { .. }) {
                device.write(conn, &encode_simple(Command::Reload));
            }
            device.disconnect(conn, 0x13);
            let counters = device.store().counters();
            println!(
                "slotvm: uploads trip={} total={}",
                counters.trip, counters.total
            );
            if run_seconds > 0 {
                run(&device, run_seconds)?;
            }
            if !matches!(outcome, WriteOutcome::Stored { .. }) {
                bail!("upload rejected: {outcome:?}");
            }
        }
    }
    Ok(())
}
