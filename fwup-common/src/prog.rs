// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Firmware programmer: staged update state machine.
//!
//! ```text
//! Idle --prog_init--> Armed --prog_scratch*--> Receiving --> Ready
//!                                                     |
//!                                          prog_update (persist intent)
//!                                                     |
//!                                       CopyNow / RebootRequired
//! ```
//!
//! An image is streamed in blocks into the scratch region, optionally
//! decrypted per block, and checksummed as it goes. Once complete, the update
//! intent is persisted in the prog-info store and the target section's identity
//! is marked invalid. [`FlashProgrammer::update_copy`] later moves scratch into
//! the section and only then marks it valid again, so a power loss at any
//! point leaves either a pending copy or a section flagged as untrusted.
//!
//! Any error ends the session; the caller restarts from `prog_init`.

use crc::Digest;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth;
use crate::flash::{FlashController, FlashDriver, FlashError};
use crate::info::{FirmwareInfo, FlashUpdate, HardwareInfo, ProgInfo};
use crate::irq::{InterruptControl, NoInterrupts};
use crate::layout::{FlashLayout, RegionKind, Section, PHRASE_SIZE};
use crate::store::{RecordStore, StoreError};
use crate::CRC32;

/// Smallest block accepted by `prog_scratch` (two cipher words).
pub const MIN_BLOCK_LEN: usize = 8;

/// Longest hash key accepted by [`ProgConfig`].
pub const MAX_KEY_LEN: usize = 64;

/// Image encoding negotiated at init.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum DataFormat {
    Binary = 0,
    Compressed = 1,
    Encrypted = 2,
    EncryptedCompressed = 3,
}

impl DataFormat {
    pub const fn encrypted(self) -> bool {
        matches!(self, DataFormat::Encrypted | DataFormat::EncryptedCompressed)
    }

    pub const fn supported(self) -> bool {
        matches!(self, DataFormat::Binary | DataFormat::Encrypted)
    }
}

impl TryFrom<u8> for DataFormat {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0 => Ok(DataFormat::Binary),
            1 => Ok(DataFormat::Compressed),
            2 => Ok(DataFormat::Encrypted),
            3 => Ok(DataFormat::EncryptedCompressed),
            other => Err(other),
        }
    }
}

/// Session request sent by the host.
///
/// Part number, revisions and serial number act as filters against the bound
/// [`HardwareInfo`]; zero matches anything.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProgInitParams {
    pub section: u8,
    pub part_number: u16,
    pub part_rev_min: u8,
    pub part_rev_max: u8,
    pub serial_number: u32,
    pub data_format: u8,
    /// Image length in bytes, as streamed.
    pub length: u32,
    /// CRC-32 of the streamed (decrypted) image.
    pub checksum: u32,
    /// SHA-1 over the signing string, see [`auth::hash_input`].
    pub hash: [u8; 20],
}

impl ProgInitParams {
    /// Fill `hash` from the other fields.
    pub fn sign(mut self, key: &str) -> Result<Self, ProgError> {
        self.hash = auth::init_digest(key, &self)?;
        Ok(self)
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProgError {
    #[error("programming session not initialised or request rejected")]
    Init,
    #[error("section cannot be programmed")]
    Section,
    #[error("length does not fit")]
    Length,
    #[error("image checksum mismatch")]
    Checksum,
    #[error("init hash mismatch")]
    Hash,
    #[error("flash error: {0}")]
    Flash(#[from] FlashError),
    #[error("flash error in prog-info store: {0}")]
    Store(#[from] StoreError),
}

/// What the caller must do after a successful `prog_update`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UpdateOutcome {
    /// The target is not executing; call `update_copy` now.
    CopyNow,
    /// Reboot so the bootloader completes the copy.
    RebootRequired,
}

/// Notifications for status LEDs and logging.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProgAction {
    Init,
    UpdateStaged,
    CopyStart,
    CopyDone,
    CopyError,
}

pub trait ActionListener {
    fn on_action(&mut self, action: ProgAction);
}

impl<F: FnMut(ProgAction)> ActionListener for F {
    fn on_action(&mut self, action: ProgAction) {
        self(action)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoActions;

impl ActionListener for NoActions {
    fn on_action(&mut self, _action: ProgAction) {}
}

/// Compiled-in identity of the running firmware.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FirmwareIdentity {
    /// Section this firmware executes from.
    pub section: Section,
    pub part_number: u16,
    pub version_major: u8,
    pub version_minor: u8,
    pub version_build: u16,
}

impl FirmwareIdentity {
    fn matches(&self, info: &FirmwareInfo) -> bool {
        info.valid
            && info.part_number == self.part_number
            && info.version_major == self.version_major
            && info.version_minor == self.version_minor
            && info.version_build == self.version_build
    }
}

/// Static programmer configuration.
#[derive(Clone, Debug)]
pub struct ProgConfig {
    pub layout: FlashLayout,
    pub hash_key: heapless::String<MAX_KEY_LEN>,
    pub identity: FirmwareIdentity,
    /// Lock the part (FSEC) when the config field is found open after a copy.
    pub secure_on_copy: bool,
}

impl ProgConfig {
    /// `None` if the key is longer than [`MAX_KEY_LEN`].
    pub fn new(layout: FlashLayout, hash_key: &str, identity: FirmwareIdentity) -> Option<Self> {
        let mut key = heapless::String::new();
        key.push_str(hash_key).ok()?;
        Some(Self {
            layout,
            hash_key: key,
            identity,
            secure_on_copy: true,
        })
    }
}

/// Coarse session state for status reporting.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProgPhase {
    Idle,
    Armed,
    Receiving { received: u32, expected: u32 },
    Ready,
}

struct Session {
    update: FlashUpdate,
    dest: Section,
    scratch_addr: u32,
    scratch_len: u32,
    crc: Digest<'static, u32>,
    block_count: u16,
    format: DataFormat,
}

/// Staged firmware programmer over an injected flash driver.
pub struct FlashProgrammer<C, I = NoInterrupts, A = NoActions> {
    flash: FlashDriver<C, I>,
    info: RecordStore,
    config: ProgConfig,
    hardware: Option<HardwareInfo>,
    session: Option<Session>,
    listener: A,
}

impl<C: FlashController, I: InterruptControl> FlashProgrammer<C, I, NoActions> {
    /// Take ownership of the driver and open the prog-info store.
    pub fn new(mut flash: FlashDriver<C, I>, config: ProgConfig) -> Result<Self, FlashError> {
        let region = config.layout.prog_info;
        let info = RecordStore::open(&mut flash, region.start, region.size)?;
        Ok(Self {
            flash,
            info,
            config,
            hardware: None,
            session: None,
            listener: NoActions,
        })
    }
}

impl<C: FlashController, I: InterruptControl, A: ActionListener> FlashProgrammer<C, I, A> {
    pub fn with_listener<B: ActionListener>(self, listener: B) -> FlashProgrammer<C, I, B> {
        FlashProgrammer {
            flash: self.flash,
            info: self.info,
            config: self.config,
            hardware: self.hardware,
            session: self.session,
            listener,
        }
    }

    pub fn config(&self) -> &ProgConfig {
        &self.config
    }

    pub fn flash(&self) -> &FlashDriver<C, I> {
        &self.flash
    }

    pub fn flash_mut(&mut self) -> &mut FlashDriver<C, I> {
        &mut self.flash
    }

    pub fn into_flash(self) -> FlashDriver<C, I> {
        self.flash
    }

    pub fn info_store(&self) -> &RecordStore {
        &self.info
    }

    pub fn listener(&self) -> &A {
        &self.listener
    }

    /// Bind hardware identity for init-time filtering; `None` disables the checks.
    pub fn set_hardware_info(&mut self, hardware: Option<HardwareInfo>) {
        self.hardware = hardware;
    }

    pub fn phase(&self) -> ProgPhase {
        match &self.session {
            None => ProgPhase::Idle,
            Some(s) if s.scratch_len >= s.update.src_length => ProgPhase::Ready,
            Some(s) if s.block_count == 0 => ProgPhase::Armed,
            Some(s) => ProgPhase::Receiving {
                received: s.scratch_len,
                expected: s.update.src_length,
            },
        }
    }

    /// Drop the in-memory session. Persisted intent is kept.
    pub fn prog_reset(&mut self) {
        self.session = None;
    }

    pub fn read_info(&self) -> Result<ProgInfo, FlashError> {
        let (info, _) = self.info.read_type::<ProgInfo, _, _>(&self.flash)?;
        Ok(info)
    }

    pub fn write_info(&mut self, info: &ProgInfo) -> Result<(), StoreError> {
        self.info.write_type(&mut self.flash, info)
    }

    fn check_hardware(&self, params: &ProgInitParams) -> Result<(), ProgError> {
        let Some(hw) = self.hardware else {
            return Ok(());
        };
        let rejected = (params.part_number > 0 && params.part_number != hw.part_number)
            || (params.part_rev_min > 0 && params.part_rev_min > hw.part_revision)
            || (params.part_rev_max > 0 && params.part_rev_max < hw.part_revision)
            || (params.serial_number > 0 && params.serial_number != hw.serial_number);
        if rejected {
            Err(ProgError::Init)
        } else {
            Ok(())
        }
    }

    /// Validate a session request, erase scratch and arm the session.
    pub fn prog_init(&mut self, params: &ProgInitParams) -> Result<(), ProgError> {
        self.prog_reset();

        if auth::init_digest(&self.config.hash_key, params)? != params.hash {
            return Err(ProgError::Hash);
        }
        self.check_hardware(params)?;

        let format = DataFormat::try_from(params.data_format).map_err(|_| ProgError::Init)?;
        if !format.supported() {
            return Err(ProgError::Init);
        }

        let dest = Section::try_from(params.section).map_err(|_| ProgError::Section)?;
        if dest == Section::Boot && self.config.identity.section == Section::Boot {
            return Err(ProgError::Section);
        }

        let layout = self.config.layout;
        let target = layout.section(dest);
        if params.length > target.size || params.length > layout.scratch.size {
            return Err(ProgError::Length);
        }

        self.flash.erase_range(layout.scratch.start, layout.scratch.size)?;

        self.session = Some(Session {
            update: FlashUpdate {
                update: true,
                src_addr: layout.scratch.start,
                src_length: params.length,
                src_checksum: params.checksum,
                dest_section: dest as u8,
                dest_addr: target.start,
                dest_size: target.size,
            },
            dest,
            scratch_addr: layout.scratch.start,
            scratch_len: 0,
            crc: CRC32.digest(),
            block_count: 0,
            format,
        });
        self.listener.on_action(ProgAction::Init);
        Ok(())
    }

    /// Decrypt (if negotiated), checksum and program one block into scratch.
    ///
    /// The block counter advances before programming, so a failed block still
    /// consumes its key.
    pub fn prog_scratch(&mut self, data: &mut [u8]) -> Result<(), ProgError> {
        let Some(mut session) = self.session.take() else {
            return Err(ProgError::Init);
        };
        if data.len() < MIN_BLOCK_LEN || data.len() % 4 != 0 {
            return Err(ProgError::Length);
        }

        if session.format.encrypted() {
            let key = auth::block_key(&self.config.hash_key, session.block_count);
            crate::xxtea::decrypt(data, &key);
        }
        session.crc.update(data);
        session.block_count = session.block_count.wrapping_add(1);

        let limit = session.update.dest_size.min(self.config.layout.scratch.size);
        let mut rest: &[u8] = data;
        while !rest.is_empty() && session.scratch_len < limit {
            let addr = session.scratch_addr;
            let offset = (addr % PHRASE_SIZE) as usize;
            let n = (PHRASE_SIZE as usize - offset).min(rest.len());

            if offset == 0 {
                let mut phrase = [0xFFu8; PHRASE_SIZE as usize];
                phrase[..n].copy_from_slice(&rest[..n]);
                self.flash.program_phrase(addr, &phrase)?;
            } else {
                self.flash.program(addr, &rest[..n])?;
            }

            rest = &rest[n..];
            session.scratch_addr += n as u32;
            session.scratch_len += n as u32;
        }

        if !rest.is_empty() {
            return Err(ProgError::Length);
        }
        self.session = Some(session);
        Ok(())
    }

    /// Close the session: verify it and persist the update intent.
    pub fn prog_update(&mut self) -> Result<UpdateOutcome, ProgError> {
        let Some(session) = self.session.take() else {
            return Err(ProgError::Init);
        };
        if session.scratch_len < session.update.src_length {
            return Err(ProgError::Length);
        }
        if session.crc.finalize() != session.update.src_checksum {
            return Err(ProgError::Checksum);
        }
        let executing = self.config.identity.section;
        if session.dest == Section::Boot && executing == Section::Boot {
            return Err(ProgError::Section);
        }

        let mut info = self.read_info()?;
        info.flash_update = session.update;
        let target = info.firmware_mut(session.dest);
        target.valid = false;
        target.part_number = 0;
        target.version_major = 0;
        target.version_minor = 0;
        target.version_build = 0;
        // Keeps a staged entry distinct from one that was never written.
        target.checksum = session.update.src_checksum;
        self.write_info(&info)?;

        self.listener.on_action(ProgAction::UpdateStaged);

        Ok(match (executing, session.dest) {
            (Section::Main, Section::Boot) => UpdateOutcome::CopyNow,
            _ => UpdateOutcome::RebootRequired,
        })
    }

    /// Complete a persisted update: copy scratch into the target section.
    ///
    /// The erase, copy, re-secure and info write run with interrupts masked.
    pub fn update_copy(&mut self) -> Result<(), ProgError> {
        let mut info = self.read_info()?;
        let update = info.flash_update;
        if !update.update || update.src_addr == 0 || update.src_length == 0 {
            return Err(ProgError::Init);
        }

        let dest = Section::try_from(update.dest_section).map_err(|_| ProgError::Section)?;
        let layout = self.config.layout;
        let target = layout.section(dest);
        if dest == self.config.identity.section
            || update.dest_addr != target.start
            || update.dest_size != target.size
            || update.src_length > target.size
        {
            return Err(ProgError::Section);
        }
        if layout.resolve(update.src_addr, update.src_length) != Some(RegionKind::Scratch) {
            return Err(ProgError::Init);
        }

        if self.scratch_crc(update.src_addr, update.src_length)? != update.src_checksum {
            return Err(ProgError::Checksum);
        }

        self.listener.on_action(ProgAction::CopyStart);

        let secure = self.config.secure_on_copy;
        let backdoor = auth::backdoor_key(&self.config.hash_key);
        let store = &mut self.info;
        let result = self.flash.critical(|flash| -> Result<(), ProgError> {
            let copied = flash
                .erase_range(update.dest_addr, update.dest_size)
                .and_then(|()| flash.copy(update.dest_addr, update.src_addr, update.src_length));
            let secured = resecure(flash, secure, &backdoor);
            copied?;
            secured?;

            let firmware = info.firmware_mut(dest);
            firmware.valid = true;
            firmware.checksum = update.src_checksum;
            info.flash_update = FlashUpdate::default();
            store.write_type(flash, &info)?;
            Ok(())
        });

        self.listener.on_action(match result {
            Ok(()) => ProgAction::CopyDone,
            Err(_) => ProgAction::CopyError,
        });
        result
    }

    fn scratch_crc(&self, addr: u32, len: u32) -> Result<u32, FlashError> {
        let mut digest = CRC32.digest();
        let mut chunk = [0u8; 256];
        let mut done = 0u32;
        while done < len {
            let n = ((len - done) as usize).min(chunk.len());
            self.flash.read(addr + done, &mut chunk[..n])?;
            digest.update(&chunk[..n]);
            done += n as u32;
        }
        Ok(digest.finalize())
    }

    /// Discard a persisted update intent, if any.
    pub fn update_clear(&mut self) -> Result<(), ProgError> {
        let mut info = self.read_info()?;
        if info.flash_update.update {
            info.flash_update = FlashUpdate::default();
            self.write_info(&info)?;
        }
        Ok(())
    }

    /// Register the running firmware's identity. Writes only on change.
    ///
    /// Returns `true` if the record was rewritten.
    pub fn update_firmware_info(&mut self) -> Result<bool, ProgError> {
        let mut info = self.read_info()?;
        let identity = self.config.identity;
        let current = info.firmware_mut(identity.section);
        if identity.matches(current) {
            return Ok(false);
        }

        current.valid = true;
        current.part_number = identity.part_number;
        current.version_major = identity.version_major;
        current.version_minor = identity.version_minor;
        current.version_build = identity.version_build;
        self.write_info(&info)?;
        Ok(true)
    }

    /// Temporarily unsecure the part with the backdoor key derived from the hash key.
    pub fn unsecure_backdoor(&mut self) -> Result<(), ProgError> {
        let key = auth::backdoor_key(&self.config.hash_key);
        self.flash.backdoor(&key)?;
        Ok(())
    }
}

/// Re-apply flash security if the config field reads unsecured.
fn resecure<C: FlashController, I: InterruptControl>(
    flash: &mut FlashDriver<C, I>,
    secure: bool,
    key: &[u8; 8],
) -> Result<(), FlashError> {
    let mut cfg = match flash.config_read() {
        Ok(cfg) => cfg,
        Err(FlashError::Param) => return Ok(()),
        Err(e) => return Err(e),
    };
    if !cfg.is_unsecured() {
        return Ok(());
    }
    if secure {
        cfg.fsec = crate::flash::FlashConfig::FSEC_SECURE;
    }
    cfg.key = *key;
    flash.config_program(&cfg)
}
