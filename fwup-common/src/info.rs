// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Programming information persisted in the prog-info record store.
//!
//! The blob keeps the natural C layout of the firmware structures (little
//! endian, fields aligned to their size, padding zeroed), 52 bytes in total.

use serde::{Deserialize, Serialize};

use crate::layout::Section;
use crate::store::StoredRecord;

/// Pending copy of scratch content into a section.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlashUpdate {
    pub update: bool,
    pub src_addr: u32,
    pub src_length: u32,
    pub src_checksum: u32,
    pub dest_section: u8,
    pub dest_addr: u32,
    pub dest_size: u32,
}

impl FlashUpdate {
    pub const SIZE: usize = 28;

    fn encode(&self, buf: &mut [u8]) {
        buf[..Self::SIZE].fill(0);
        buf[0] = self.update as u8;
        buf[4..8].copy_from_slice(&self.src_addr.to_le_bytes());
        buf[8..12].copy_from_slice(&self.src_length.to_le_bytes());
        buf[12..16].copy_from_slice(&self.src_checksum.to_le_bytes());
        buf[16] = self.dest_section;
        buf[20..24].copy_from_slice(&self.dest_addr.to_le_bytes());
        buf[24..28].copy_from_slice(&self.dest_size.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Self {
        Self {
            update: buf[0] != 0,
            src_addr: le_u32(&buf[4..8]),
            src_length: le_u32(&buf[8..12]),
            src_checksum: le_u32(&buf[12..16]),
            dest_section: buf[16],
            dest_addr: le_u32(&buf[20..24]),
            dest_size: le_u32(&buf[24..28]),
        }
    }
}

/// Identity of the firmware held in one section.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FirmwareInfo {
    /// False while the section may be mid-update.
    pub valid: bool,
    pub part_number: u16,
    pub version_major: u8,
    pub version_minor: u8,
    pub version_build: u16,
    pub checksum: u32,
}

impl FirmwareInfo {
    pub const SIZE: usize = 12;

    fn encode(&self, buf: &mut [u8]) {
        buf[..Self::SIZE].fill(0);
        buf[0] = self.valid as u8;
        buf[2..4].copy_from_slice(&self.part_number.to_le_bytes());
        buf[4] = self.version_major;
        buf[5] = self.version_minor;
        buf[6..8].copy_from_slice(&self.version_build.to_le_bytes());
        buf[8..12].copy_from_slice(&self.checksum.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Self {
        Self {
            valid: buf[0] != 0,
            part_number: u16::from_le_bytes([buf[2], buf[3]]),
            version_major: buf[4],
            version_minor: buf[5],
            version_build: u16::from_le_bytes([buf[6], buf[7]]),
            checksum: le_u32(&buf[8..12]),
        }
    }
}

/// Everything the programmer persists.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ProgInfo {
    pub flash_update: FlashUpdate,
    /// Indexed by [`Section`].
    pub firmware: [FirmwareInfo; 2],
}

impl ProgInfo {
    pub fn firmware(&self, section: Section) -> &FirmwareInfo {
        &self.firmware[section.index()]
    }

    pub fn firmware_mut(&mut self, section: Section) -> &mut FirmwareInfo {
        &mut self.firmware[section.index()]
    }

    pub fn update_pending(&self) -> bool {
        self.flash_update.update
    }
}

impl StoredRecord for ProgInfo {
    const SIZE: usize = FlashUpdate::SIZE + 2 * FirmwareInfo::SIZE;

    fn encode(&self, buf: &mut [u8]) {
        let (update, firmware) = buf.split_at_mut(FlashUpdate::SIZE);
        self.flash_update.encode(update);
        for (info, chunk) in self.firmware.iter().zip(firmware.chunks_mut(FirmwareInfo::SIZE)) {
            info.encode(chunk);
        }
    }

    fn decode(buf: &[u8]) -> Self {
        let (update, firmware) = buf.split_at(FlashUpdate::SIZE);
        let mut info = Self {
            flash_update: FlashUpdate::decode(update),
            ..Self::default()
        };
        for (slot, chunk) in info.firmware.iter_mut().zip(firmware.chunks(FirmwareInfo::SIZE)) {
            *slot = FirmwareInfo::decode(chunk);
        }
        info
    }
}

/// Identity of the hardware, checked against init requests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HardwareInfo {
    pub part_number: u16,
    pub part_revision: u8,
    pub serial_number: u32,
    pub flags_sys: u32,
    pub flags_user: u32,
}

fn le_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}
