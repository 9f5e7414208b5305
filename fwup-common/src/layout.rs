// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Flash geometry and the static partitioning of the address space.
//!
//! Every address the update engine programs must resolve to exactly one of the
//! regions below. Two layouts are provided:
//! - [`FlashLayout::K60`]: 1 MiB part mapped at 0, with a protected security field at 0x400
//! - [`FlashLayout::RP2040`]: 2 MiB QSPI part mapped into XIP space at 0x1000_0000

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Smallest programmable unit, in bytes.
pub const PHRASE_SIZE: u32 = 8;

/// Round `len` up to a whole number of phrases.
pub const fn phrase_ceil(len: u32) -> u32 {
    (len + PHRASE_SIZE - 1) & !(PHRASE_SIZE - 1)
}

/// A contiguous address range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Region {
    pub start: u32,
    pub size: u32,
}

impl Region {
    pub const fn new(start: u32, size: u32) -> Self {
        Self { start, size }
    }

    /// First address past the region.
    pub const fn end(&self) -> u64 {
        self.start as u64 + self.size as u64
    }

    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.start && (addr as u64) < self.end()
    }

    /// True if `[addr, addr + len)` lies entirely inside the region.
    pub fn contains_range(&self, addr: u32, len: u32) -> bool {
        addr >= self.start && addr as u64 + len as u64 <= self.end()
    }

    pub fn overlaps(&self, other: &Region) -> bool {
        (self.start as u64) < other.end() && (other.start as u64) < self.end()
    }
}

/// Physical characteristics of the flash array.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlashGeometry {
    /// Address of the first byte of flash.
    pub base: u32,
    pub size: u32,
    /// Smallest erasable unit.
    pub sector_size: u32,
    pub block_size: u32,
    /// Security/configuration field that must not be programmed unless unlocked.
    pub config: Option<Region>,
}

impl FlashGeometry {
    pub const K60: Self = Self {
        base: 0,
        size: 0x10_0000,
        sector_size: 0x1000,
        block_size: 0x4_0000,
        config: Some(Region::new(0x400, 0x10)),
    };

    pub const RP2040: Self = Self {
        base: 0x1000_0000,
        size: 0x20_0000,
        sector_size: 0x1000,
        block_size: 0x1_0000,
        config: None,
    };

    pub const fn region(&self) -> Region {
        Region::new(self.base, self.size)
    }

    pub const fn sector_floor(&self, addr: u32) -> u32 {
        addr & !(self.sector_size - 1)
    }

    pub const fn block_floor(&self, addr: u32) -> u32 {
        addr & !(self.block_size - 1)
    }

    /// Round `len` up to whole sectors, with a minimum of one sector.
    pub const fn sector_ceil(&self, len: u32) -> u32 {
        let rounded = (len + self.sector_size - 1) & !(self.sector_size - 1);
        if rounded == 0 {
            self.sector_size
        } else {
            rounded
        }
    }
}

/// Executable flash sections.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Section {
    Boot = 0,
    Main = 1,
}

impl Section {
    pub const fn index(self) -> usize {
        self as usize
    }
}

impl TryFrom<u8> for Section {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0 => Ok(Section::Boot),
            1 => Ok(Section::Main),
            other => Err(other),
        }
    }
}

/// Named regions of the layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegionKind {
    Boot,
    Main,
    Scratch,
    Settings,
    ProgInfo,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LayoutError {
    #[error("{0:?} region is not sector aligned")]
    Misaligned(RegionKind),
    #[error("{0:?} region lies outside the flash array")]
    OutOfBounds(RegionKind),
    #[error("{0:?} and {1:?} regions overlap")]
    Overlap(RegionKind, RegionKind),
}

/// Static partitioning of the flash array.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlashLayout {
    pub geometry: FlashGeometry,
    pub boot: Region,
    pub main: Region,
    pub scratch: Region,
    pub settings: Region,
    pub prog_info: Region,
}

impl FlashLayout {
    pub const K60: Self = Self {
        geometry: FlashGeometry::K60,
        boot: Region::new(0x0000_0000, 0x1_0000),
        main: Region::new(0x0001_0000, 0x7_0000),
        scratch: Region::new(0x0008_0000, 0x7_0000),
        settings: Region::new(0x000F_0000, 0xF000),
        prog_info: Region::new(0x000F_F000, 0x1000),
    };

    pub const RP2040: Self = Self {
        geometry: FlashGeometry::RP2040,
        boot: Region::new(0x1000_0000, 0x1_0000),
        main: Region::new(0x1001_0000, 0xC_0000),
        scratch: Region::new(0x100D_0000, 0xC_0000),
        settings: Region::new(0x1019_0000, 0xF000),
        prog_info: Region::new(0x1019_F000, 0x1000),
    };

    pub const fn section(&self, section: Section) -> Region {
        match section {
            Section::Boot => self.boot,
            Section::Main => self.main,
        }
    }

    pub const fn regions(&self) -> [(RegionKind, Region); 5] {
        [
            (RegionKind::Boot, self.boot),
            (RegionKind::Main, self.main),
            (RegionKind::Scratch, self.scratch),
            (RegionKind::Settings, self.settings),
            (RegionKind::ProgInfo, self.prog_info),
        ]
    }

    /// Find the single region holding `[addr, addr + len)`.
    ///
    /// Returns `None` for ranges outside every region or straddling a boundary.
    pub fn resolve(&self, addr: u32, len: u32) -> Option<RegionKind> {
        self.regions()
            .into_iter()
            .find(|(_, region)| region.contains_range(addr, len.max(1)))
            .map(|(kind, _)| kind)
    }

    pub fn validate(&self) -> Result<(), LayoutError> {
        let device = self.geometry.region();
        let regions = self.regions();

        for (i, (kind, region)) in regions.iter().enumerate() {
            if region.start % self.geometry.sector_size != 0
                || region.size % self.geometry.sector_size != 0
                || region.size == 0
            {
                return Err(LayoutError::Misaligned(*kind));
            }
            if !device.contains_range(region.start, region.size) {
                return Err(LayoutError::OutOfBounds(*kind));
            }
            for (other_kind, other) in &regions[i + 1..] {
                if region.overlaps(other) {
                    return Err(LayoutError::Overlap(*kind, *other_kind));
                }
            }
        }

        Ok(())
    }
}
