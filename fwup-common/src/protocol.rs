// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Shared protocol types for bootloader <-> host communication.
//!
//! This module provides types that work in both `no_std` (embedded) and `std` (host) environments.
//! Use the `std` feature for host tools. Frames are postcard-encoded and COBS-delimited.

#[cfg(feature = "std")]
extern crate alloc;

use serde::{Deserialize, Serialize};

use crate::info::FirmwareInfo;
use crate::prog::{ProgError, ProgInitParams, ProgPhase, UpdateOutcome};

/// Word in RAM the application writes before resetting into the bootloader.
pub const RAM_UPDATE_FLAG_ADDR: u32 = 0x2003_BFF0;
pub const RAM_UPDATE_MAGIC: u32 = 0x0FDA_7E00;

/// Maximum data block size for `ProgScratch`.
pub const MAX_BLOCK_SIZE: usize = 1024;

/// Largest encoded frame, COBS overhead included.
pub const MAX_FRAME_SIZE: usize = MAX_BLOCK_SIZE + 64;

#[derive(Serialize, Deserialize, Debug)]
#[allow(clippy::large_enum_variant)] // no_std, no allocator for Box
pub enum Command {
    GetStatus,
    ProgInit(ProgInitParams),
    #[cfg(not(feature = "std"))]
    ProgScratch {
        data: heapless::Vec<u8, MAX_BLOCK_SIZE>,
    },
    #[cfg(feature = "std")]
    ProgScratch { data: alloc::vec::Vec<u8> },
    ProgUpdate,
    ProgReset,
    /// Drop a persisted update intent.
    UpdateClear,
    Reboot,
}

impl Command {
    /// Build a `ProgScratch` frame; `None` if `data` exceeds [`MAX_BLOCK_SIZE`].
    pub fn scratch(data: &[u8]) -> Option<Self> {
        if data.len() > MAX_BLOCK_SIZE {
            return None;
        }
        #[cfg(not(feature = "std"))]
        let data = heapless::Vec::from_slice(data).ok()?;
        #[cfg(feature = "std")]
        let data = data.to_vec();
        Some(Command::ProgScratch { data })
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub enum Response {
    Ack(AckStatus),
    Status {
        phase: ProgPhase,
        update_pending: bool,
        boot: FirmwareInfo,
        main: FirmwareInfo,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AckStatus {
    Ok,
    /// Image staged; the device copies it without a reboot.
    CopyNow,
    /// Image staged; reboot to complete the copy.
    RebootRequired,
    InitError,
    SectionError,
    LengthError,
    ChecksumError,
    HashError,
    FlashError,
    BadCommand,
}

impl AckStatus {
    pub fn is_ok(self) -> bool {
        matches!(
            self,
            AckStatus::Ok | AckStatus::CopyNow | AckStatus::RebootRequired
        )
    }
}

impl From<ProgError> for AckStatus {
    fn from(err: ProgError) -> Self {
        match err {
            ProgError::Init => AckStatus::InitError,
            ProgError::Section => AckStatus::SectionError,
            ProgError::Length => AckStatus::LengthError,
            ProgError::Checksum => AckStatus::ChecksumError,
            ProgError::Hash => AckStatus::HashError,
            ProgError::Flash(_) | ProgError::Store(_) => AckStatus::FlashError,
        }
    }
}

impl From<UpdateOutcome> for AckStatus {
    fn from(outcome: UpdateOutcome) -> Self {
        match outcome {
            UpdateOutcome::CopyNow => AckStatus::CopyNow,
            UpdateOutcome::RebootRequired => AckStatus::RebootRequired,
        }
    }
}

impl<T: Into<AckStatus>> From<Result<T, ProgError>> for AckStatus {
    fn from(result: Result<T, ProgError>) -> Self {
        match result {
            Ok(v) => v.into(),
            Err(e) => e.into(),
        }
    }
}

impl From<()> for AckStatus {
    fn from(_: ()) -> Self {
        AckStatus::Ok
    }
}
