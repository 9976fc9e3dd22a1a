// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Library surface of the slotvm firmware core.
// Author: Lukas Bower
#![deny(unsafe_code)]
#![deny(unsafe_op_in_unsafe_fn)]
#![deny(deprecated)]
#![warn(missing_docs)]

//! Dual-slot script host firmware core.
//!
//! A wireless client uploads script bytecode in chunks ([`upload`]), the
//! device persists it compressed ([`bytecode`], [`storage`], [`compress`]),
//! and the [`supervisor`] keeps two script images running, restarting the
//! runtime on every reload request. The [`watchdog`] feeds the hardware timer
//! only while every monitored thread and every opted-in script is alive.

extern crate alloc;

pub mod bytecode;
pub mod capability;
pub mod comm;
pub mod compress;
pub mod config;
pub mod console;
pub mod error;
pub mod identity;
pub mod settings;
pub mod storage;
pub mod supervisor;
pub mod upload;
pub mod watchdog;

#[cfg(not(target_os = "none"))]
pub mod host;
