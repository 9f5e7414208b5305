// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! In-memory NOR flash controller.
//!
//! Used by the host dry-run and the test suite. Behaves like the real array:
//! - erase sets bytes to 0xFF, program can only clear bits
//! - programming a phrase that needs a 0 -> 1 transition fails with MGSTAT0
//! - misaligned or out-of-range commands fail with ACCERR
//!
//! Fault injection covers single command failures and power loss.

use crate::flash::{FlashCommand, FlashConfig, FlashController, FlashStatus, CONFIG_SIZE};
use crate::layout::{FlashGeometry, PHRASE_SIZE};

/// Command counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SimStats {
    pub programs: u32,
    pub erases: u32,
    pub verifies: u32,
    pub checks: u32,
}

/// Flash controller backed by a borrowed byte array.
pub struct SimFlash<'m> {
    mem: &'m mut [u8],
    geometry: FlashGeometry,
    stats: SimStats,
    fail_next: u32,
    fail_status: FlashStatus,
    power_budget: Option<u32>,
    unlocked: bool,
}

impl<'m> SimFlash<'m> {
    /// Wrap `mem` as the flash array described by `geometry`. Bytes beyond
    /// `mem` read as erased and reject commands.
    pub fn new(mem: &'m mut [u8], geometry: FlashGeometry) -> Self {
        Self {
            mem,
            geometry,
            stats: SimStats::default(),
            fail_next: 0,
            fail_status: FlashStatus::failed(FlashStatus::ACCERR),
            power_budget: None,
            unlocked: false,
        }
    }

    pub fn stats(&self) -> SimStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = SimStats::default();
    }

    pub fn memory(&self) -> &[u8] {
        self.mem
    }

    /// Make the next `count` commands fail with `status` without touching memory.
    pub fn inject_failures(&mut self, count: u32, status: FlashStatus) {
        self.fail_next = count;
        self.fail_status = status;
    }

    /// Let `count` more erase/program commands land, then drop every later one.
    pub fn cut_power_after(&mut self, count: u32) {
        self.power_budget = Some(count);
    }

    pub fn restore_power(&mut self) {
        self.power_budget = None;
    }

    pub fn powered(&self) -> bool {
        self.power_budget != Some(0)
    }

    /// True once a backdoor key has been accepted.
    pub fn unlocked(&self) -> bool {
        self.unlocked
    }

    fn span(&self, addr: u32, len: u32) -> Option<core::ops::Range<usize>> {
        let offset = addr.checked_sub(self.geometry.base)? as usize;
        let end = offset.checked_add(len as usize)?;
        (end <= self.mem.len()).then_some(offset..end)
    }

    fn is_blank(&self, addr: u32, len: u32) -> FlashStatus {
        match self.span(addr, len) {
            Some(span) if self.mem[span.clone()].iter().all(|&b| b == 0xFF) => FlashStatus::DONE,
            Some(_) => FlashStatus::failed(FlashStatus::MGSTAT0),
            None => FlashStatus::failed(FlashStatus::ACCERR),
        }
    }

    fn erase(&mut self, addr: u32, len: u32) -> FlashStatus {
        if addr % len != 0 {
            return FlashStatus::failed(FlashStatus::ACCERR);
        }
        match self.span(addr, len) {
            Some(span) => {
                self.mem[span].fill(0xFF);
                self.stats.erases += 1;
                FlashStatus::DONE
            }
            None => FlashStatus::failed(FlashStatus::ACCERR),
        }
    }

    fn program(&mut self, addr: u32, data: &[u8; 8]) -> FlashStatus {
        if addr % PHRASE_SIZE != 0 {
            return FlashStatus::failed(FlashStatus::ACCERR);
        }
        let Some(span) = self.span(addr, PHRASE_SIZE) else {
            return FlashStatus::failed(FlashStatus::ACCERR);
        };
        self.stats.programs += 1;

        let cells = &mut self.mem[span];
        let mut status = FlashStatus::DONE;
        for (cell, &byte) in cells.iter_mut().zip(data) {
            *cell &= byte;
            if *cell != byte {
                status = FlashStatus::failed(FlashStatus::MGSTAT0);
            }
        }
        status
    }

    fn check(&mut self, addr: u32, data: &[u8; 4]) -> FlashStatus {
        self.stats.checks += 1;
        match self.span(addr, 4) {
            Some(span) if addr % 4 == 0 && self.mem[span.clone()] == data[..] => FlashStatus::DONE,
            Some(_) if addr % 4 == 0 => FlashStatus::failed(FlashStatus::MGSTAT0),
            _ => FlashStatus::failed(FlashStatus::ACCERR),
        }
    }

    fn bypass(&mut self, key: &[u8; 8]) -> FlashStatus {
        let Some(region) = self.geometry.config else {
            return FlashStatus::failed(FlashStatus::ACCERR);
        };
        let mut bytes = [0xFFu8; CONFIG_SIZE];
        self.read(region.start, &mut bytes);
        let cfg = FlashConfig::from_bytes(&bytes);

        let key_valid = cfg.key != [0xFF; 8] && cfg.key != [0x00; 8];
        if cfg.backdoor_enabled() && key_valid && cfg.key == *key {
            self.unlocked = true;
            FlashStatus::DONE
        } else {
            FlashStatus::failed(FlashStatus::ACCERR)
        }
    }
}

impl FlashController for SimFlash<'_> {
    fn read(&self, addr: u32, buf: &mut [u8]) {
        match self.span(addr, buf.len() as u32) {
            Some(span) => buf.copy_from_slice(&self.mem[span]),
            None => buf.fill(0xFF),
        }
    }

    fn launch(&mut self, cmd: &FlashCommand) -> FlashStatus {
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return self.fail_status;
        }

        let mutates = matches!(
            cmd,
            FlashCommand::ProgramPhrase { .. }
                | FlashCommand::EraseSector { .. }
                | FlashCommand::EraseBlock { .. }
                | FlashCommand::EraseAll
        );
        if mutates {
            match self.power_budget {
                Some(0) => return FlashStatus::failed(FlashStatus::ACCERR),
                Some(ref mut left) => *left -= 1,
                None => {}
            }
        }

        match *cmd {
            FlashCommand::VerifyBlock { addr, .. } => {
                self.stats.verifies += 1;
                self.is_blank(addr, self.geometry.block_size)
            }
            FlashCommand::VerifySection { addr, len, .. } => {
                self.stats.verifies += 1;
                self.is_blank(addr, len)
            }
            FlashCommand::ProgramCheck { addr, data, .. } => self.check(addr, &data),
            FlashCommand::ProgramPhrase { addr, data } => self.program(addr, &data),
            FlashCommand::EraseBlock { addr } => self.erase(addr, self.geometry.block_size),
            FlashCommand::EraseSector { addr } => self.erase(addr, self.geometry.sector_size),
            FlashCommand::EraseAll => {
                self.mem.fill(0xFF);
                self.stats.erases += 1;
                FlashStatus::DONE
            }
            FlashCommand::SecurityBypass { key } => self.bypass(&key),
        }
    }
}
