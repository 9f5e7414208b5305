// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Flash array driver.
//!
//! The driver owns alignment and re-assembly so callers may program arbitrary
//! byte ranges. Hardware access goes through [`FlashController`], a typed
//! command layer: the record store and programmer only ever see
//! [`FlashError`], never raw status registers.
//!
//! Rules enforced here:
//! - erase in whole sectors (or blocks), program in whole phrases
//! - boundary phrases are read, merged with existing content and re-programmed
//! - the configuration field is never programmed while the config lock is held
//! - every command launch runs under the nesting interrupt lock
//!
//! Nothing is retried at this layer.

use thiserror::Error;

use crate::irq::{InterruptControl, IrqLock, NoInterrupts};
use crate::layout::{FlashGeometry, PHRASE_SIZE};

/// Value that must be passed to [`FlashDriver::erase_all`].
pub const ERASE_ALL_CONFIRM: u32 = 0xAA55_CC33;

/// Size of the configuration field.
pub const CONFIG_SIZE: usize = 16;

const CHECK_SIZE: u32 = 4;
const COPY_CHUNK: usize = 256;

/// Read margin used by verify and program-check commands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum MarginLevel {
    #[default]
    Normal = 0,
    User = 1,
    Factory = 2,
}

/// A single flash controller command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlashCommand {
    VerifyBlock { addr: u32, margin: MarginLevel },
    VerifySection { addr: u32, len: u32, margin: MarginLevel },
    ProgramCheck { addr: u32, data: [u8; 4], margin: MarginLevel },
    ProgramPhrase { addr: u32, data: [u8; 8] },
    EraseBlock { addr: u32 },
    EraseSector { addr: u32 },
    EraseAll,
    SecurityBypass { key: [u8; 8] },
}

impl FlashCommand {
    /// Controller opcode.
    pub const fn code(&self) -> u8 {
        match self {
            FlashCommand::VerifyBlock { .. } => 0x00,
            FlashCommand::VerifySection { .. } => 0x01,
            FlashCommand::ProgramCheck { .. } => 0x02,
            FlashCommand::ProgramPhrase { .. } => 0x07,
            FlashCommand::EraseBlock { .. } => 0x08,
            FlashCommand::EraseSector { .. } => 0x09,
            FlashCommand::EraseAll => 0x44,
            FlashCommand::SecurityBypass { .. } => 0x45,
        }
    }
}

/// Controller status register after a command completes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlashStatus(u8);

impl FlashStatus {
    pub const CCIF: u8 = 0x80;
    pub const RDCOLERR: u8 = 0x40;
    pub const ACCERR: u8 = 0x20;
    pub const FPVIOL: u8 = 0x10;
    pub const MGSTAT0: u8 = 0x01;

    /// Command complete, no error flags.
    pub const DONE: Self = Self(Self::CCIF);

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Completed with the given error flag(s) raised.
    pub const fn failed(flags: u8) -> Self {
        Self(Self::CCIF | flags)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn complete(self) -> bool {
        self.0 & Self::CCIF != 0
    }

    pub const fn read_collision(self) -> bool {
        self.0 & Self::RDCOLERR != 0
    }

    pub const fn access_error(self) -> bool {
        self.0 & Self::ACCERR != 0
    }

    pub const fn protection_violation(self) -> bool {
        self.0 & Self::FPVIOL != 0
    }

    pub const fn verify_failed(self) -> bool {
        self.0 & Self::MGSTAT0 != 0
    }

    /// Map the error flags, highest priority first.
    pub fn result(self) -> Result<(), FlashError> {
        if self.access_error() {
            Err(FlashError::Access)
        } else if self.protection_violation() {
            Err(FlashError::ProtectionViolation)
        } else if self.verify_failed() {
            Err(FlashError::VerifyFailed)
        } else {
            Ok(())
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlashError {
    #[error("address range outside the flash array")]
    Range,
    #[error("flash access error")]
    Access,
    #[error("flash protection violation")]
    ProtectionViolation,
    #[error("flash verify failed")]
    VerifyFailed,
    #[error("invalid parameter")]
    Param,
}

/// Register-level access to a flash controller.
///
/// `launch` must block until the command completes. Addresses are absolute.
pub trait FlashController {
    fn read(&self, addr: u32, buf: &mut [u8]);
    fn launch(&mut self, cmd: &FlashCommand) -> FlashStatus;
}

/// Flash security configuration field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlashConfig {
    /// Backdoor comparison key.
    pub key: [u8; 8],
    pub fprot: [u8; 4],
    pub fsec: u8,
    pub fopt: u8,
    pub feprot: u8,
    pub fdprot: u8,
}

impl FlashConfig {
    pub const FSEC_SEC_MASK: u8 = 0x03;
    /// Backdoor enabled, mass erase enabled, failure analysis granted, secure.
    pub const FSEC_SECURE: u8 = 0xBC;
    pub const FSEC_KEYEN_SHIFT: u8 = 6;

    pub fn from_bytes(bytes: &[u8; CONFIG_SIZE]) -> Self {
        let mut key = [0u8; 8];
        key.copy_from_slice(&bytes[..8]);
        let mut fprot = [0u8; 4];
        fprot.copy_from_slice(&bytes[8..12]);
        Self {
            key,
            fprot,
            fsec: bytes[12],
            fopt: bytes[13],
            feprot: bytes[14],
            fdprot: bytes[15],
        }
    }

    pub fn to_bytes(&self) -> [u8; CONFIG_SIZE] {
        let mut bytes = [0u8; CONFIG_SIZE];
        bytes[..8].copy_from_slice(&self.key);
        bytes[8..12].copy_from_slice(&self.fprot);
        bytes[12] = self.fsec;
        bytes[13] = self.fopt;
        bytes[14] = self.feprot;
        bytes[15] = self.fdprot;
        bytes
    }

    /// True if the SEC field reports anything but the secured state.
    pub fn is_unsecured(&self) -> bool {
        self.fsec & Self::FSEC_SEC_MASK != 0
    }

    pub fn backdoor_enabled(&self) -> bool {
        (self.fsec >> Self::FSEC_KEYEN_SHIFT) & 0x03 == 0x02
    }
}

/// Flash driver over an injected controller and interrupt control.
pub struct FlashDriver<C, I = NoInterrupts> {
    ctrl: C,
    irq: IrqLock<I>,
    geometry: FlashGeometry,
    config_lock: bool,
}

impl<C: FlashController> FlashDriver<C, NoInterrupts> {
    /// Driver with no interrupt masking.
    pub fn without_interrupts(ctrl: C, geometry: FlashGeometry) -> Self {
        Self::new(ctrl, NoInterrupts, geometry)
    }
}

impl<C: FlashController, I: InterruptControl> FlashDriver<C, I> {
    /// Create a driver. The configuration field starts locked.
    pub fn new(ctrl: C, irq: I, geometry: FlashGeometry) -> Self {
        Self {
            ctrl,
            irq: IrqLock::new(irq),
            geometry,
            config_lock: true,
        }
    }

    pub fn geometry(&self) -> &FlashGeometry {
        &self.geometry
    }

    pub fn controller(&self) -> &C {
        &self.ctrl
    }

    pub fn controller_mut(&mut self) -> &mut C {
        &mut self.ctrl
    }

    pub fn into_controller(self) -> C {
        self.ctrl
    }

    pub fn irq(&self) -> &IrqLock<I> {
        &self.irq
    }

    /// Run `f` with the interrupt lock held. Commands issued inside nest.
    pub fn critical<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.irq.acquire();
        let result = f(self);
        self.irq.release();
        result
    }

    /// Launch one command under the interrupt lock and map its status.
    pub fn execute(&mut self, cmd: &FlashCommand) -> Result<(), FlashError> {
        let status = {
            let _guard = self.irq.lock();
            self.ctrl.launch(cmd)
        };
        status.result()
    }

    fn check_range(&self, addr: u32, len: u32) -> Result<(), FlashError> {
        if self.geometry.region().contains_range(addr, len) {
            Ok(())
        } else {
            Err(FlashError::Range)
        }
    }

    fn in_config(&self, addr: u32) -> bool {
        self.geometry
            .config
            .is_some_and(|cfg| cfg.contains(addr))
    }

    pub fn read(&self, addr: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        self.check_range(addr, buf.len() as u32)?;
        self.ctrl.read(addr, buf);
        Ok(())
    }

    pub fn erase_sector(&mut self, addr: u32) -> Result<(), FlashError> {
        let addr = self.geometry.sector_floor(addr);
        self.check_range(addr, self.geometry.sector_size)?;
        self.execute(&FlashCommand::EraseSector { addr })
    }

    /// Erase whole sectors. Both `addr` and `size` are rounded down to sector
    /// boundaries; the first failing sector aborts the operation.
    pub fn erase_range(&mut self, addr: u32, size: u32) -> Result<(), FlashError> {
        let mut addr = self.geometry.sector_floor(addr);
        let mut size = self.geometry.sector_floor(size);
        if size == 0 {
            return Ok(());
        }
        self.check_range(addr, size)?;

        while size > 0 {
            self.erase_sector(addr)?;
            addr += self.geometry.sector_size;
            size -= self.geometry.sector_size;
        }
        Ok(())
    }

    pub fn erase_sectors(&mut self, addr: u32, count: u16) -> Result<(), FlashError> {
        self.erase_range(addr, count as u32 * self.geometry.sector_size)
    }

    pub fn erase_block(&mut self, addr: u32) -> Result<(), FlashError> {
        let addr = self.geometry.block_floor(addr);
        self.check_range(addr, self.geometry.block_size)?;
        self.execute(&FlashCommand::EraseBlock { addr })
    }

    /// Erase the whole array. Requires [`ERASE_ALL_CONFIRM`].
    pub fn erase_all(&mut self, confirm: u32) -> Result<(), FlashError> {
        if confirm != ERASE_ALL_CONFIRM {
            return Err(FlashError::Param);
        }
        self.execute(&FlashCommand::EraseAll)
    }

    /// Program one phrase. The address is forced to phrase alignment.
    ///
    /// While the config lock is held, phrases inside the configuration field
    /// are skipped and reported as success so bulk copies are not aborted.
    pub fn program_phrase(&mut self, addr: u32, data: &[u8; 8]) -> Result<(), FlashError> {
        let addr = addr & !(PHRASE_SIZE - 1);
        self.check_range(addr, PHRASE_SIZE)?;
        if self.config_lock && self.in_config(addr) {
            return Ok(());
        }
        self.execute(&FlashCommand::ProgramPhrase { addr, data: *data })
    }

    /// Program an arbitrary byte range.
    ///
    /// Partial phrases at either end are filled with the bytes already in
    /// flash, so untouched neighbours are re-programmed with their own value.
    pub fn program(&mut self, addr: u32, data: &[u8]) -> Result<(), FlashError> {
        if data.is_empty() {
            return Ok(());
        }
        self.check_range(addr, data.len() as u32)?;

        let mut addr = addr;
        let mut rest = data;
        while !rest.is_empty() {
            let offset = (addr % PHRASE_SIZE) as usize;
            let phrase_addr = addr - offset as u32;
            let mut phrase = [0u8; PHRASE_SIZE as usize];

            let n = if offset > 0 || rest.len() < phrase.len() {
                self.ctrl.read(phrase_addr, &mut phrase);
                let n = (phrase.len() - offset).min(rest.len());
                phrase[offset..offset + n].copy_from_slice(&rest[..n]);
                n
            } else {
                let len = phrase.len();
                phrase.copy_from_slice(&rest[..len]);
                len
            };

            self.program_phrase(phrase_addr, &phrase)?;
            rest = &rest[n..];
            addr = phrase_addr + PHRASE_SIZE;
        }
        Ok(())
    }

    /// Program-check a byte range at the given margin, in long words.
    pub fn check(&mut self, addr: u32, data: &[u8], margin: MarginLevel) -> Result<(), FlashError> {
        if data.is_empty() {
            return Ok(());
        }
        self.check_range(addr, data.len() as u32)?;

        let mut addr = addr;
        let mut rest = data;
        while !rest.is_empty() {
            let offset = (addr % CHECK_SIZE) as usize;
            let word_addr = addr - offset as u32;
            let mut word = [0u8; CHECK_SIZE as usize];
            self.ctrl.read(word_addr, &mut word);
            let n = (word.len() - offset).min(rest.len());
            word[offset..offset + n].copy_from_slice(&rest[..n]);

            self.execute(&FlashCommand::ProgramCheck {
                addr: word_addr,
                data: word,
                margin,
            })?;
            rest = &rest[n..];
            addr = word_addr + CHECK_SIZE;
        }
        Ok(())
    }

    /// Copy `len` bytes from one flash address to another (destination must be erased).
    pub fn copy(&mut self, dest: u32, src: u32, len: u32) -> Result<(), FlashError> {
        self.check_range(src, len)?;
        self.check_range(dest, len)?;

        let mut buf = [0u8; COPY_CHUNK];
        let mut done = 0u32;
        while done < len {
            let n = ((len - done) as usize).min(buf.len());
            self.ctrl.read(src + done, &mut buf[..n]);
            self.program(dest + done, &buf[..n])?;
            done += n as u32;
        }
        Ok(())
    }

    pub fn verify_block(&mut self, addr: u32, margin: MarginLevel) -> Result<(), FlashError> {
        let addr = self.geometry.block_floor(addr);
        self.check_range(addr, self.geometry.block_size)?;
        self.execute(&FlashCommand::VerifyBlock { addr, margin })
    }

    pub fn verify_sector(&mut self, addr: u32, margin: MarginLevel) -> Result<(), FlashError> {
        self.verify_sectors(addr, 1, margin)
    }

    /// Check that `count` sectors read as erased at the given margin.
    pub fn verify_sectors(
        &mut self,
        addr: u32,
        count: u16,
        margin: MarginLevel,
    ) -> Result<(), FlashError> {
        let addr = self.geometry.sector_floor(addr);
        let len = count as u32 * self.geometry.sector_size;
        self.check_range(addr, len)?;
        self.execute(&FlashCommand::VerifySection { addr, len, margin })
    }

    pub fn config_lock(&self) -> bool {
        self.config_lock
    }

    pub fn set_config_lock(&mut self, locked: bool) {
        self.config_lock = locked;
    }

    /// Read the configuration field. `Param` if the part has none.
    pub fn config_read(&self) -> Result<FlashConfig, FlashError> {
        let region = self.geometry.config.ok_or(FlashError::Param)?;
        let mut bytes = [0u8; CONFIG_SIZE];
        self.read(region.start, &mut bytes)?;
        Ok(FlashConfig::from_bytes(&bytes))
    }

    /// Program the configuration field, lifting the config lock for the duration.
    pub fn config_program(&mut self, cfg: &FlashConfig) -> Result<(), FlashError> {
        let region = self.geometry.config.ok_or(FlashError::Param)?;
        let locked = self.config_lock;
        self.config_lock = false;
        let result = self.program(region.start, &cfg.to_bytes());
        self.config_lock = locked;
        result
    }

    /// Temporarily unsecure the part with the backdoor key.
    pub fn backdoor(&mut self, key: &[u8; 8]) -> Result<(), FlashError> {
        self.execute(&FlashCommand::SecurityBypass { key: *key })
    }
}
