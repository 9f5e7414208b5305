// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Flash-backed firmware update engine shared by the bootloader and host tools.
//!
//! This crate supports both `no_std` (embedded) and `std` (host) environments:
//! - Default: `no_std` mode for embedded targets
//! - `std` feature: Enables `std` support for host tools
//! - `embedded` feature: Enables Cortex-M interrupt control and board helpers
//! - `defmt` feature: Derives `defmt::Format` on status and error types

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "std")]
extern crate alloc;

pub mod auth;
pub mod boot;
pub mod flash;
pub mod info;
pub mod irq;
pub mod layout;
pub mod prog;
pub mod protocol;
pub mod sim;
pub mod store;
pub mod xxtea;

use crc::{Crc, CRC_16_XMODEM, CRC_32_ISO_HDLC};

/// CRC-32 used for image checksums (staging, copy verification, host packing).
pub static CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// CRC-16 used for record store payloads.
pub static CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

// Re-export commonly used types
pub use flash::{FlashCommand, FlashController, FlashDriver, FlashError, FlashStatus, MarginLevel};
pub use info::{FirmwareInfo, FlashUpdate, HardwareInfo, ProgInfo};
pub use irq::{InterruptControl, IrqLock, NoInterrupts};
pub use layout::{FlashGeometry, FlashLayout, Region, RegionKind, Section, PHRASE_SIZE};
pub use prog::{
    ActionListener, DataFormat, FirmwareIdentity, FlashProgrammer, NoActions, ProgAction,
    ProgConfig, ProgError, ProgInitParams, ProgPhase, UpdateOutcome,
};
pub use protocol::{AckStatus, Command, Response, MAX_BLOCK_SIZE};
pub use sim::SimFlash;
pub use store::{RecordStore, StoreError};

#[cfg(feature = "embedded")]
use embedded_hal::delay::DelayNs;
#[cfg(feature = "embedded")]
use embedded_hal::digital::OutputPin;

/// Blink an LED a specified number of times.
#[cfg(feature = "embedded")]
pub fn blink(led: &mut impl OutputPin, timer: &mut impl DelayNs, count: u32, period_ms: u32) {
    for _ in 0..count {
        led.set_high().ok();
        timer.delay_ms(period_ms);
        led.set_low().ok();
        timer.delay_ms(period_ms);
    }
}
