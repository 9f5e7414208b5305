// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Log-structured, wear-levelling record store.
//!
//! A store owns a sector-aligned flash region holding a singly linked chain of
//! records, each a 16-byte header followed by its payload padded to a phrase:
//!
//! ```text
//! +0  state        u64  Free = !0, Active = 0xFFFF_FFFF_0000_0000, Ignore = 0
//! +8  next_header  u32  absolute address of the following header
//! +12 length       u16  payload length in bytes
//! +14 checksum     u16  CRC-16 of the payload
//! ```
//!
//! State changes only clear bits (Free -> Active -> Ignore), so a record is
//! superseded by over-programming its first phrase. At most one record is
//! Active; a Free header ends the chain. When the region runs out of room or
//! the chain is found corrupt, the region is erased and the chain restarts.

use thiserror::Error;

use crate::flash::{FlashController, FlashDriver, FlashError, MarginLevel};
use crate::irq::InterruptControl;
use crate::layout::{phrase_ceil, Region, PHRASE_SIZE};
use crate::CRC16;

pub const HEADER_SIZE: u32 = 16;

/// Erase attempts allowed within a single write.
pub const MAX_ERASE_ATTEMPTS: u8 = 5;

/// Largest encoded size of a [`StoredRecord`].
pub const MAX_TYPED_SIZE: usize = 256;

const SCAN_CHUNK: usize = 64;

/// Record state phrase values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RecordState {
    Free,
    Active,
    Ignore,
}

impl RecordState {
    pub const FREE: u64 = 0xFFFF_FFFF_FFFF_FFFF;
    pub const ACTIVE: u64 = 0xFFFF_FFFF_0000_0000;
    pub const IGNORE: u64 = 0;

    pub const fn from_raw(raw: u64) -> Option<Self> {
        match raw {
            Self::FREE => Some(RecordState::Free),
            Self::ACTIVE => Some(RecordState::Active),
            Self::IGNORE => Some(RecordState::Ignore),
            _ => None,
        }
    }

    pub const fn raw(self) -> u64 {
        match self {
            RecordState::Free => Self::FREE,
            RecordState::Active => Self::ACTIVE,
            RecordState::Ignore => Self::IGNORE,
        }
    }
}

/// On-flash record header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RecordHeader {
    pub state: u64,
    pub next_header: u32,
    pub length: u16,
    pub checksum: u16,
}

impl RecordHeader {
    pub fn from_bytes(bytes: &[u8; HEADER_SIZE as usize]) -> Self {
        let mut state = [0u8; 8];
        state.copy_from_slice(&bytes[0..8]);
        Self {
            state: u64::from_le_bytes(state),
            next_header: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            length: u16::from_le_bytes([bytes[12], bytes[13]]),
            checksum: u16::from_le_bytes([bytes[14], bytes[15]]),
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE as usize] {
        let mut bytes = [0u8; HEADER_SIZE as usize];
        bytes[0..8].copy_from_slice(&self.state.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.next_header.to_le_bytes());
        bytes[12..14].copy_from_slice(&self.length.to_le_bytes());
        bytes[14..16].copy_from_slice(&self.checksum.to_le_bytes());
        bytes
    }

    pub fn state(&self) -> Option<RecordState> {
        RecordState::from_raw(self.state)
    }
}

/// Why a chain could not be trusted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CorruptKind {
    /// Payload or cursor runs past the region end.
    Range,
    /// Payload does not match its CRC-16.
    Checksum,
    /// State phrase is not one of the three sentinels.
    BadState,
    /// Link points backwards or off phrase alignment.
    Link,
}

/// One traversal step, decided from a header alone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    /// Obsolete record, continue at the given header address.
    Next(u32),
    /// Active record whose payload fits the region; checksum still unchecked.
    Active(u32),
    /// End of written history; the address is where the next header goes.
    Empty(u32),
    Corrupt(CorruptKind),
}

/// Classify the header found at `cursor` inside `region`.
pub fn step(region: &Region, cursor: u32, header: &RecordHeader) -> Step {
    match header.state() {
        Some(RecordState::Free) => Step::Empty(cursor),
        Some(RecordState::Active) => {
            let data_end = cursor as u64 + HEADER_SIZE as u64 + header.length as u64;
            if data_end >= region.end() {
                Step::Corrupt(CorruptKind::Range)
            } else {
                Step::Active(cursor)
            }
        }
        Some(RecordState::Ignore) => {
            let next = header.next_header;
            if next <= cursor || next % PHRASE_SIZE != 0 {
                Step::Corrupt(CorruptKind::Link)
            } else {
                Step::Next(next)
            }
        }
        None => Step::Corrupt(CorruptKind::BadState),
    }
}

/// Result of scanning a region for its active record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lookup {
    Found { addr: u32, header: RecordHeader },
    Empty(u32),
    Corrupt(CorruptKind),
}

fn read_header<C: FlashController, I: InterruptControl>(
    flash: &FlashDriver<C, I>,
    addr: u32,
) -> Result<RecordHeader, FlashError> {
    let mut bytes = [0u8; HEADER_SIZE as usize];
    flash.read(addr, &mut bytes)?;
    Ok(RecordHeader::from_bytes(&bytes))
}

fn crc16_at<C: FlashController, I: InterruptControl>(
    flash: &FlashDriver<C, I>,
    addr: u32,
    len: u32,
) -> Result<u16, FlashError> {
    let mut digest = CRC16.digest();
    let mut chunk = [0u8; SCAN_CHUNK];
    let mut done = 0u32;
    while done < len {
        let n = ((len - done) as usize).min(chunk.len());
        flash.read(addr + done, &mut chunk[..n])?;
        digest.update(&chunk[..n]);
        done += n as u32;
    }
    Ok(digest.finalize())
}

fn matches_flash<C: FlashController, I: InterruptControl>(
    flash: &FlashDriver<C, I>,
    addr: u32,
    data: &[u8],
) -> Result<bool, FlashError> {
    let mut chunk = [0u8; SCAN_CHUNK];
    for (i, expected) in data.chunks(SCAN_CHUNK).enumerate() {
        let stored = &mut chunk[..expected.len()];
        flash.read(addr + (i * SCAN_CHUNK) as u32, stored)?;
        if stored != expected {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Walk the chain from the region base to its active record.
pub fn find_active<C: FlashController, I: InterruptControl>(
    flash: &FlashDriver<C, I>,
    region: &Region,
) -> Lookup {
    let mut cursor = region.start;
    while (cursor as u64 + HEADER_SIZE as u64) <= region.end() {
        let Ok(header) = read_header(flash, cursor) else {
            return Lookup::Corrupt(CorruptKind::Range);
        };
        match step(region, cursor, &header) {
            Step::Next(next) => cursor = next,
            Step::Empty(free) => return Lookup::Empty(free),
            Step::Corrupt(kind) => return Lookup::Corrupt(kind),
            Step::Active(addr) => {
                return match crc16_at(flash, addr + HEADER_SIZE, header.length as u32) {
                    Ok(crc) if crc == header.checksum => Lookup::Found { addr, header },
                    Ok(_) => Lookup::Corrupt(CorruptKind::Checksum),
                    Err(_) => Lookup::Corrupt(CorruptKind::Range),
                };
            }
        }
    }
    Lookup::Corrupt(CorruptKind::Range)
}

/// Iterator over every written header in a chain, active or obsolete.
pub struct RecordIter<'a, C, I> {
    flash: &'a FlashDriver<C, I>,
    region: Region,
    cursor: Option<u32>,
}

impl<C: FlashController, I: InterruptControl> Iterator for RecordIter<'_, C, I> {
    type Item = (u32, RecordHeader);

    fn next(&mut self) -> Option<Self::Item> {
        let cursor = self.cursor.take()?;
        if cursor as u64 + HEADER_SIZE as u64 > self.region.end() {
            return None;
        }
        let header = read_header(self.flash, cursor).ok()?;
        match header.state()? {
            RecordState::Free => None,
            RecordState::Active | RecordState::Ignore => {
                let next = header.next_header;
                if next > cursor && next % PHRASE_SIZE == 0 {
                    self.cursor = Some(next);
                }
                Some((cursor, header))
            }
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StoreError {
    #[error("record of {len} bytes does not fit a {capacity} byte store")]
    TooLarge { len: usize, capacity: u32 },
    #[error("store erase failed: {0}")]
    Erase(FlashError),
    #[error("erase attempt limit reached")]
    EraseLimit,
    #[error("store read failed: {0}")]
    Read(FlashError),
}

/// Fixed-size value persisted through a store.
pub trait StoredRecord: Sized {
    /// Encoded size; at most [`MAX_TYPED_SIZE`].
    const SIZE: usize;

    fn encode(&self, buf: &mut [u8]);
    /// Decode from `SIZE` bytes; missing trailing bytes are zero.
    fn decode(buf: &[u8]) -> Self;
}

/// How a stored payload compared with the requested size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReadSize {
    /// No active record; the destination was zero-filled.
    Empty,
    /// All `n` stored bytes were copied.
    Fits(u16),
    /// Stored payload was larger by this many bytes and was cut.
    Truncated(u16),
}

impl ReadSize {
    /// Bytes read, or the negative size excess when truncated.
    pub fn signed(self) -> i32 {
        match self {
            ReadSize::Empty => 0,
            ReadSize::Fits(n) => n as i32,
            ReadSize::Truncated(extra) => -(extra as i32),
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct ActiveRecord {
    data_addr: u32,
    len: u16,
}

enum WriteState {
    FindActive,
    Modify { addr: u32, header: RecordHeader },
    Invalidate { addr: u32, header: RecordHeader },
    Erase,
    Write { addr: u32 },
}

/// Handle on one store region. The flash driver is passed to each call.
#[derive(Debug)]
pub struct RecordStore {
    region: Region,
    active: Option<ActiveRecord>,
}

impl RecordStore {
    /// Open the store at `addr` (rounded down to a sector) spanning `size`
    /// bytes (rounded up to whole sectors, at least one).
    ///
    /// If no valid record is found and the region is not blank it is erased,
    /// so the region is always programmable afterwards.
    pub fn open<C: FlashController, I: InterruptControl>(
        flash: &mut FlashDriver<C, I>,
        addr: u32,
        size: u32,
    ) -> Result<Self, FlashError> {
        let geometry = *flash.geometry();
        let mut store = Self {
            region: Region::new(geometry.sector_floor(addr), geometry.sector_ceil(size)),
            active: None,
        };

        if !matches!(store.reload(flash), Lookup::Found { .. }) && !store.is_blank(flash) {
            store.erase(flash)?;
        }
        Ok(store)
    }

    pub fn region(&self) -> Region {
        self.region
    }

    /// Length of the active payload, 0 if none.
    pub fn read_len(&self) -> u16 {
        self.active.map_or(0, |a| a.len)
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_none()
    }

    /// Re-scan the chain and refresh the read pointer.
    pub fn reload<C: FlashController, I: InterruptControl>(
        &mut self,
        flash: &FlashDriver<C, I>,
    ) -> Lookup {
        let lookup = find_active(flash, &self.region);
        self.active = match lookup {
            Lookup::Found { addr, header } => Some(ActiveRecord {
                data_addr: addr + HEADER_SIZE,
                len: header.length,
            }),
            _ => None,
        };
        lookup
    }

    pub fn is_blank<C: FlashController, I: InterruptControl>(
        &self,
        flash: &mut FlashDriver<C, I>,
    ) -> bool {
        let sectors = (self.region.size / flash.geometry().sector_size) as u16;
        flash
            .verify_sectors(self.region.start, sectors, MarginLevel::Normal)
            .is_ok()
    }

    /// Erase the whole region, discarding every record.
    pub fn erase<C: FlashController, I: InterruptControl>(
        &mut self,
        flash: &mut FlashDriver<C, I>,
    ) -> Result<(), FlashError> {
        self.active = None;
        flash.erase_range(self.region.start, self.region.size)
    }

    /// Copy the active payload into `dest`, zero-filling the remainder.
    ///
    /// Returns the number of payload bytes copied, 0 if there is no record.
    pub fn read<C: FlashController, I: InterruptControl>(
        &self,
        flash: &FlashDriver<C, I>,
        dest: &mut [u8],
    ) -> Result<usize, FlashError> {
        let Some(active) = self.active else {
            dest.fill(0);
            return Ok(0);
        };
        let n = dest.len().min(active.len as usize);
        flash.read(active.data_addr, &mut dest[..n])?;
        dest[n..].fill(0);
        Ok(n)
    }

    /// Read a typed value, reporting any size mismatch.
    pub fn read_type<T: StoredRecord, C: FlashController, I: InterruptControl>(
        &self,
        flash: &FlashDriver<C, I>,
    ) -> Result<(T, ReadSize), FlashError> {
        let mut buf = [0u8; MAX_TYPED_SIZE];
        let buf = &mut buf[..T::SIZE.min(MAX_TYPED_SIZE)];
        let n = self.read(flash, buf)?;

        let stored = self.read_len() as usize;
        let size = if self.active.is_none() {
            ReadSize::Empty
        } else if stored > buf.len() {
            ReadSize::Truncated((stored - buf.len()) as u16)
        } else {
            ReadSize::Fits(n as u16)
        };
        Ok((T::decode(buf), size))
    }

    pub fn write_type<T: StoredRecord, C: FlashController, I: InterruptControl>(
        &mut self,
        flash: &mut FlashDriver<C, I>,
        value: &T,
    ) -> Result<(), StoreError> {
        let mut buf = [0u8; MAX_TYPED_SIZE];
        let buf = &mut buf[..T::SIZE.min(MAX_TYPED_SIZE)];
        value.encode(buf);
        self.write(flash, buf)
    }

    /// Make `data` the active record.
    ///
    /// Identical content is left untouched. Otherwise the current record is
    /// invalidated and the new one appended; running out of room, a corrupt
    /// chain or a failed program erases the region and starts over, at most
    /// [`MAX_ERASE_ATTEMPTS`] times.
    pub fn write<C: FlashController, I: InterruptControl>(
        &mut self,
        flash: &mut FlashDriver<C, I>,
        data: &[u8],
    ) -> Result<(), StoreError> {
        let too_large = StoreError::TooLarge {
            len: data.len(),
            capacity: self.region.size,
        };
        let length = u16::try_from(data.len()).map_err(|_| too_large)?;
        if data.len() as u64 + HEADER_SIZE as u64 >= self.region.size as u64 {
            return Err(too_large);
        }

        let checksum = CRC16.checksum(data);
        let mut erase_count = 0u8;
        let mut state = WriteState::FindActive;

        loop {
            state = match state {
                WriteState::FindActive => match find_active(flash, &self.region) {
                    Lookup::Found { addr, header } => WriteState::Modify { addr, header },
                    Lookup::Empty(addr) => WriteState::Write { addr },
                    Lookup::Corrupt(_) => WriteState::Erase,
                },

                WriteState::Modify { addr, header } => {
                    let same = header.length == length
                        && header.checksum == checksum
                        && matches_flash(flash, addr + HEADER_SIZE, data).map_err(StoreError::Read)?;
                    if same {
                        self.active = Some(ActiveRecord {
                            data_addr: addr + HEADER_SIZE,
                            len: length,
                        });
                        return Ok(());
                    }
                    WriteState::Invalidate { addr, header }
                }

                WriteState::Invalidate { addr, header } => {
                    let ignore = RecordState::IGNORE.to_le_bytes();
                    match flash.critical(|f| f.program_phrase(addr, &ignore)) {
                        Ok(()) => {
                            self.active = None;
                            WriteState::Write {
                                addr: header.next_header,
                            }
                        }
                        Err(_) => WriteState::Erase,
                    }
                }

                WriteState::Erase => {
                    if erase_count >= MAX_ERASE_ATTEMPTS {
                        return Err(StoreError::EraseLimit);
                    }
                    erase_count += 1;
                    self.erase(flash).map_err(StoreError::Erase)?;
                    WriteState::Write {
                        addr: self.region.start,
                    }
                }

                WriteState::Write { addr } => match self.append(flash, addr, data, checksum) {
                    Ok(()) => {
                        self.active = Some(ActiveRecord {
                            data_addr: addr + HEADER_SIZE,
                            len: length,
                        });
                        return Ok(());
                    }
                    Err(_) => WriteState::Erase,
                },
            };
        }
    }

    fn append<C: FlashController, I: InterruptControl>(
        &self,
        flash: &mut FlashDriver<C, I>,
        addr: u32,
        data: &[u8],
        checksum: u16,
    ) -> Result<(), FlashError> {
        let data_addr = addr as u64 + HEADER_SIZE as u64;
        if addr < self.region.start
            || addr % PHRASE_SIZE != 0
            || data_addr + data.len() as u64 >= self.region.end()
        {
            return Err(FlashError::Range);
        }

        let header = RecordHeader {
            state: RecordState::ACTIVE,
            next_header: addr + HEADER_SIZE + phrase_ceil(data.len() as u32),
            length: data.len() as u16,
            checksum,
        };
        flash.program(addr, &header.to_bytes())?;
        flash.program(addr + HEADER_SIZE, data)
    }

    /// Iterate the written headers of the chain.
    pub fn records<'a, C: FlashController, I: InterruptControl>(
        &self,
        flash: &'a FlashDriver<C, I>,
    ) -> RecordIter<'a, C, I> {
        RecordIter {
            flash,
            region: self.region,
            cursor: Some(self.region.start),
        }
    }
}
