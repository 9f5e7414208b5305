// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! RP2040 flash controller built on the boot ROM routines.
//!
//! On RP2040, flash operations (erase/program) require disabling XIP first.
//! The full sequence is:
//!   1. connect_internal_flash()
//!   2. flash_exit_xip()
//!   3. flash_range_erase() or flash_range_program()
//!   4. flash_flush_cache()
//!   5. flash_enter_cmd_xip()
//!
//! All code executing during steps 1-5 must run from RAM, not flash.
//! We use `#[link_section = ".data"]` to place critical functions in RAM,
//! and pre-resolve all ROM function pointers at init time. Interrupts are
//! masked by the driver's lock around every command, not here.
//!
//! The QSPI part programs 256-byte pages. A phrase program is a page program
//! where every byte outside the phrase is 0xFF, which leaves those cells as
//! they are.

use fwup_common::flash::{FlashCommand, FlashController, FlashStatus};
use fwup_common::{FlashGeometry, PHRASE_SIZE};

const GEOMETRY: FlashGeometry = FlashGeometry::RP2040;
const PAGE_SIZE: usize = 256;

const SECTOR_ERASE_CMD: u8 = 0x20;
const BLOCK_ERASE_CMD: u8 = 0xD8;

// ROM function pointer types
type RomFnVoid = unsafe extern "C" fn();
type RomFnErase = unsafe extern "C" fn(u32, usize, u32, u8);
type RomFnProgram = unsafe extern "C" fn(u32, *const u8, usize);

/// ROM function pointers, resolved once at init from the ROM table.
/// Stored in static RAM so RAM-resident functions can call them without
/// accessing flash-based code.
static mut ROM_CONNECT_INTERNAL_FLASH: RomFnVoid = dummy_void;
static mut ROM_FLASH_EXIT_XIP: RomFnVoid = dummy_void;
static mut ROM_FLASH_RANGE_ERASE: RomFnErase = dummy_erase;
static mut ROM_FLASH_RANGE_PROGRAM: RomFnProgram = dummy_program;
static mut ROM_FLASH_FLUSH_CACHE: RomFnVoid = dummy_void;
static mut ROM_FLASH_ENTER_CMD_XIP: RomFnVoid = dummy_void;

unsafe extern "C" fn dummy_void() {}
unsafe extern "C" fn dummy_erase(_: u32, _: usize, _: u32, _: u8) {}
unsafe extern "C" fn dummy_program(_: u32, _: *const u8, _: usize) {}

/// Look up a ROM function by its two-character tag.
/// ROM table pointer at 0x14 and lookup function at 0x18 are 16-bit halfword pointers.
unsafe fn rom_func_lookup(tag: &[u8; 2]) -> usize {
    let fn_table = *(0x14 as *const u16) as *const u16;
    let lookup: unsafe extern "C" fn(*const u16, u32) -> usize =
        core::mem::transmute::<usize, unsafe extern "C" fn(*const u16, u32) -> usize>(
            *(0x18 as *const u16) as usize,
        );
    let code = u16::from_le_bytes(*tag) as u32;
    lookup(fn_table, code)
}

/// Erase `size` bytes at a flash-relative offset with the given erase granule.
#[link_section = ".data"]
#[inline(never)]
unsafe fn rom_erase(offset: u32, size: u32, block_size: u32, cmd: u8) {
    ROM_CONNECT_INTERNAL_FLASH();
    ROM_FLASH_EXIT_XIP();
    ROM_FLASH_RANGE_ERASE(offset, size as usize, block_size, cmd);
    ROM_FLASH_FLUSH_CACHE();
    ROM_FLASH_ENTER_CMD_XIP();
}

/// Program whole pages at a flash-relative offset.
#[link_section = ".data"]
#[inline(never)]
unsafe fn rom_program(offset: u32, data: *const u8, len: usize) {
    ROM_CONNECT_INTERNAL_FLASH();
    ROM_FLASH_EXIT_XIP();
    ROM_FLASH_RANGE_PROGRAM(offset, data, len);
    ROM_FLASH_FLUSH_CACHE();
    ROM_FLASH_ENTER_CMD_XIP();
}

/// Read bytes from an absolute XIP flash address via volatile reads.
pub fn flash_read(abs_addr: u32, buf: &mut [u8]) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte = unsafe { ((abs_addr + i as u32) as *const u8).read_volatile() };
    }
}

/// Flash controller over the ROM routines. Only one may exist.
pub struct RomFlash {
    _private: (),
}

impl RomFlash {
    /// Resolve the ROM function pointers. This performs ROM table lookups
    /// which require XIP to be active.
    pub fn init() -> Self {
        unsafe {
            ROM_CONNECT_INTERNAL_FLASH =
                core::mem::transmute::<usize, RomFnVoid>(rom_func_lookup(b"IF"));
            ROM_FLASH_EXIT_XIP = core::mem::transmute::<usize, RomFnVoid>(rom_func_lookup(b"EX"));
            ROM_FLASH_RANGE_ERASE =
                core::mem::transmute::<usize, RomFnErase>(rom_func_lookup(b"RE"));
            ROM_FLASH_RANGE_PROGRAM =
                core::mem::transmute::<usize, RomFnProgram>(rom_func_lookup(b"RP"));
            ROM_FLASH_FLUSH_CACHE =
                core::mem::transmute::<usize, RomFnVoid>(rom_func_lookup(b"FC"));
            ROM_FLASH_ENTER_CMD_XIP =
                core::mem::transmute::<usize, RomFnVoid>(rom_func_lookup(b"CX"));
        }
        Self { _private: () }
    }

    fn offset(addr: u32, len: u32, align: u32) -> Option<u32> {
        if addr % align != 0 || !GEOMETRY.region().contains_range(addr, len) {
            return None;
        }
        Some(addr - GEOMETRY.base)
    }

    fn erase(&mut self, addr: u32, size: u32, cmd: u8) -> FlashStatus {
        let Some(offset) = Self::offset(addr, size, size) else {
            return FlashStatus::failed(FlashStatus::ACCERR);
        };
        unsafe { rom_erase(offset, size, size, cmd) };
        self.blank(addr, size)
    }

    fn program_phrase(&mut self, addr: u32, data: &[u8; 8]) -> FlashStatus {
        let Some(offset) = Self::offset(addr, PHRASE_SIZE, PHRASE_SIZE) else {
            return FlashStatus::failed(FlashStatus::ACCERR);
        };

        let mut current = [0u8; 8];
        flash_read(addr, &mut current);
        if current.iter().zip(data).any(|(&c, &d)| c & d != d) {
            return FlashStatus::failed(FlashStatus::MGSTAT0);
        }

        let page_offset = offset as usize % PAGE_SIZE;
        let mut page = [0xFFu8; PAGE_SIZE];
        page[page_offset..page_offset + data.len()].copy_from_slice(data);
        unsafe { rom_program(offset - page_offset as u32, page.as_ptr(), PAGE_SIZE) };

        self.matches(addr, data)
    }

    fn blank(&self, addr: u32, len: u32) -> FlashStatus {
        if Self::offset(addr, len, 1).is_none() {
            return FlashStatus::failed(FlashStatus::ACCERR);
        }
        let mut chunk = [0u8; 64];
        let mut done = 0u32;
        while done < len {
            let n = ((len - done) as usize).min(chunk.len());
            flash_read(addr + done, &mut chunk[..n]);
            if chunk[..n].iter().any(|&b| b != 0xFF) {
                return FlashStatus::failed(FlashStatus::MGSTAT0);
            }
            done += n as u32;
        }
        FlashStatus::DONE
    }

    fn matches(&self, addr: u32, expected: &[u8]) -> FlashStatus {
        let mut actual = [0u8; 8];
        let actual = &mut actual[..expected.len()];
        flash_read(addr, actual);
        if actual == expected {
            FlashStatus::DONE
        } else {
            FlashStatus::failed(FlashStatus::MGSTAT0)
        }
    }
}

impl FlashController for RomFlash {
    fn read(&self, addr: u32, buf: &mut [u8]) {
        flash_read(addr, buf);
    }

    fn launch(&mut self, cmd: &FlashCommand) -> FlashStatus {
        match *cmd {
            FlashCommand::EraseSector { addr } => {
                self.erase(addr, GEOMETRY.sector_size, SECTOR_ERASE_CMD)
            }
            FlashCommand::EraseBlock { addr } => {
                self.erase(addr, GEOMETRY.block_size, BLOCK_ERASE_CMD)
            }
            FlashCommand::ProgramPhrase { addr, data } => self.program_phrase(addr, &data),
            FlashCommand::VerifyBlock { addr, .. } => self.blank(addr, GEOMETRY.block_size),
            FlashCommand::VerifySection { addr, len, .. } => self.blank(addr, len),
            FlashCommand::ProgramCheck { addr, data, .. } => {
                if Self::offset(addr, 4, 4).is_none() {
                    return FlashStatus::failed(FlashStatus::ACCERR);
                }
                self.matches(addr, &data)
            }
            // No mass erase or security field on the QSPI part.
            FlashCommand::EraseAll | FlashCommand::SecurityBypass { .. } => {
                FlashStatus::failed(FlashStatus::ACCERR)
            }
        }
    }
}
