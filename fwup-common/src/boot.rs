// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Boot-time decision - pure logic without hardware dependencies.
//!
//! The bootloader gathers the persisted [`ProgInfo`], the update trigger and a
//! plausibility check of the main image's vector table, then asks [`decide`]
//! what to do. Reading flash and jumping stay in the bootloader binary.

use crate::info::{FirmwareInfo, ProgInfo};
use crate::layout::{Region, Section};

/// What the bootloader should do next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootAction {
    /// A staged image targets the main section; copy it before anything else.
    CompleteCopy,
    StartMain,
    EnterUpdateMode,
}

/// Initial stack pointer and reset vector of an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct VectorTable {
    pub initial_sp: u32,
    pub reset_vector: u32,
}

impl VectorTable {
    /// Decode the first two little-endian words of an image.
    pub fn from_bytes(bytes: &[u8; 8]) -> Self {
        Self {
            initial_sp: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            reset_vector: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }

    /// Stack inside `ram` (end inclusive), reset handler inside `code` and in Thumb mode.
    pub fn is_plausible(&self, ram: &Region, code: &Region) -> bool {
        let sp = self.initial_sp as u64;
        let sp_ok = sp >= ram.start as u64 && sp <= ram.end();
        sp_ok && code.contains(self.reset_vector & !1) && self.reset_vector & 1 == 1
    }
}

/// Pick the boot action.
///
/// `info` is `None` when the prog-info store holds no record yet (factory
/// state); the main image is then trusted on its vector table alone. The same
/// holds for a main entry that was never written, as happens once the
/// bootloader has registered only its own identity.
pub fn decide(info: Option<&ProgInfo>, update_requested: bool, main_plausible: bool) -> BootAction {
    if let Some(info) = info {
        if info.update_pending() && info.flash_update.dest_section == Section::Main as u8 {
            return BootAction::CompleteCopy;
        }
    }

    if update_requested {
        return BootAction::EnterUpdateMode;
    }

    let main_valid = info.is_none_or(|i| {
        let main = i.firmware(Section::Main);
        main.valid || *main == FirmwareInfo::default()
    });
    if main_valid && main_plausible {
        BootAction::StartMain
    } else {
        BootAction::EnterUpdateMode
    }
}
