// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Record store tests: chain traversal, rewrite rules, erase escalation and power loss.

use fwup_common::store::{
    find_active, step, CorruptKind, Lookup, ReadSize, RecordHeader, RecordState, Step,
    HEADER_SIZE, MAX_ERASE_ATTEMPTS,
};
use fwup_common::{
    FlashCommand, FlashController, FlashDriver, FlashGeometry, FlashLayout, FlashStatus, ProgInfo,
    RecordStore, Region, SimFlash, StoreError,
};

const GEOM: FlashGeometry = FlashGeometry::K60;
const REGION: Region = FlashLayout::K60.prog_info;

fn blank() -> Vec<u8> {
    vec![0xFF; GEOM.size as usize]
}

fn driver(mem: &mut [u8]) -> FlashDriver<SimFlash<'_>> {
    FlashDriver::without_interrupts(SimFlash::new(mem, GEOM), GEOM)
}

fn open(flash: &mut FlashDriver<SimFlash<'_>>) -> RecordStore {
    RecordStore::open(flash, REGION.start, REGION.size).unwrap()
}

fn read_all(store: &RecordStore, flash: &FlashDriver<SimFlash<'_>>) -> Vec<u8> {
    let mut buf = vec![0u8; store.read_len() as usize];
    store.read(flash, &mut buf).unwrap();
    buf
}

// =============================================================================
// step() tests
// =============================================================================

fn header(state: u64, next_header: u32, length: u16) -> RecordHeader {
    RecordHeader {
        state,
        next_header,
        length,
        checksum: 0,
    }
}

#[test]
fn test_step_free_header_is_end_of_chain() {
    let h = header(RecordState::FREE, 0xFFFF_FFFF, 0xFFFF);
    assert_eq!(step(&REGION, REGION.start + 48, &h), Step::Empty(REGION.start + 48));
}

#[test]
fn test_step_ignore_follows_link() {
    let h = header(RecordState::IGNORE, REGION.start + 40, 20);
    assert_eq!(step(&REGION, REGION.start, &h), Step::Next(REGION.start + 40));
}

#[test]
fn test_step_rejects_backward_link() {
    let h = header(RecordState::IGNORE, REGION.start, 20);
    assert_eq!(
        step(&REGION, REGION.start + 40, &h),
        Step::Corrupt(CorruptKind::Link)
    );
}

#[test]
fn test_step_rejects_misaligned_link() {
    let h = header(RecordState::IGNORE, REGION.start + 42, 20);
    assert_eq!(
        step(&REGION, REGION.start, &h),
        Step::Corrupt(CorruptKind::Link)
    );
}

#[test]
fn test_step_active_past_region_end() {
    let h = header(RecordState::ACTIVE, 0, 0x0FF0);
    assert_eq!(
        step(&REGION, REGION.start + 0x10, &h),
        Step::Corrupt(CorruptKind::Range)
    );
}

#[test]
fn test_step_unknown_state() {
    let h = header(0x1234, 0, 0);
    assert_eq!(
        step(&REGION, REGION.start, &h),
        Step::Corrupt(CorruptKind::BadState)
    );
}

#[test]
fn test_header_bytes_are_little_endian() {
    let h = RecordHeader {
        state: RecordState::ACTIVE,
        next_header: 0x000F_F028,
        length: 0x0018,
        checksum: 0xBEEF,
    };
    let bytes = h.to_bytes();
    assert_eq!(&bytes[0..8], &[0, 0, 0, 0, 0xFF, 0xFF, 0xFF, 0xFF]);
    assert_eq!(&bytes[8..12], &[0x28, 0xF0, 0x0F, 0x00]);
    assert_eq!(&bytes[12..16], &[0x18, 0x00, 0xEF, 0xBE]);
    assert_eq!(RecordHeader::from_bytes(&bytes), h);
}

// =============================================================================
// open / read tests
// =============================================================================

#[test]
fn test_open_blank_region() {
    let mut mem = blank();
    let mut flash = driver(&mut mem);
    let store = open(&mut flash);

    assert!(store.is_empty());
    assert_eq!(store.read_len(), 0);
    assert_eq!(flash.controller().stats().erases, 0);

    let mut buf = [0xAAu8; 8];
    assert_eq!(store.read(&flash, &mut buf).unwrap(), 0);
    assert_eq!(buf, [0u8; 8]);
}

#[test]
fn test_open_rounds_region_to_sectors() {
    let mut mem = blank();
    let mut flash = driver(&mut mem);
    let store = RecordStore::open(&mut flash, REGION.start + 0x10, 0x20).unwrap();
    assert_eq!(store.region(), REGION);
}

#[test]
fn test_open_erases_garbage() {
    let mut mem = blank();
    let mut flash = driver(&mut mem);
    flash.program(REGION.start, &[0x5A; 32]).unwrap();

    let store = open(&mut flash);
    assert!(store.is_empty());
    assert!(store.is_blank(&mut flash));
    assert_eq!(flash.controller().stats().erases, 1);
}

// =============================================================================
// write tests
// =============================================================================

#[test]
fn test_write_then_read() {
    let mut mem = blank();
    let mut flash = driver(&mut mem);
    let mut store = open(&mut flash);

    store.write(&mut flash, b"hello record").unwrap();

    assert_eq!(store.read_len(), 12);
    assert_eq!(read_all(&store, &flash), b"hello record");

    let reopened = open(&mut flash);
    assert_eq!(read_all(&reopened, &flash), b"hello record");
}

#[test]
fn test_identical_rewrite_programs_nothing() {
    let mut mem = blank();
    let mut flash = driver(&mut mem);
    let mut store = open(&mut flash);
    store.write(&mut flash, &[7u8; 40]).unwrap();

    flash.controller_mut().reset_stats();
    store.write(&mut flash, &[7u8; 40]).unwrap();

    assert_eq!(flash.controller().stats().programs, 0);
    assert_eq!(flash.controller().stats().erases, 0);
    assert_eq!(store.records(&flash).count(), 1);
}

#[test]
fn test_rewrite_invalidates_previous_record() {
    let mut mem = blank();
    let mut flash = driver(&mut mem);
    let mut store = open(&mut flash);
    store.write(&mut flash, b"first").unwrap();
    store.write(&mut flash, b"second value").unwrap();

    let records: Vec<_> = store.records(&flash).collect();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].1.state(), Some(RecordState::Ignore));
    assert_eq!(records[0].1.next_header, records[1].0);
    assert_eq!(records[1].1.state(), Some(RecordState::Active));
    // header + "first" padded to one phrase
    assert_eq!(records[1].0, REGION.start + HEADER_SIZE + 8);

    assert_eq!(read_all(&store, &flash), b"second value");
}

#[test]
fn test_at_most_one_active_record() {
    let mut mem = blank();
    let mut flash = driver(&mut mem);
    let mut store = open(&mut flash);

    for i in 0..200u32 {
        let payload = i.to_le_bytes().repeat(10);
        store.write(&mut flash, &payload).unwrap();

        let active = store
            .records(&flash)
            .filter(|(_, h)| h.state() == Some(RecordState::Active))
            .count();
        assert_eq!(active, 1);
    }

    assert!(flash.controller().stats().erases > 0);
    assert_eq!(read_all(&store, &flash), 199u32.to_le_bytes().repeat(10));
}

#[test]
fn test_full_region_wraps_to_start() {
    let mut mem = blank();
    let mut flash = driver(&mut mem);
    let mut store = open(&mut flash);
    let record = HEADER_SIZE + 104;
    let fit = (REGION.size - 1) / record;

    for i in 0..fit {
        store.write(&mut flash, &[i as u8; 100]).unwrap();
    }
    assert_eq!(flash.controller().stats().erases, 0);

    store.write(&mut flash, &[0xEE; 100]).unwrap();
    assert_eq!(flash.controller().stats().erases, 1);
    assert_eq!(
        find_active(&flash, &REGION),
        Lookup::Found {
            addr: REGION.start,
            header: store.records(&flash).next().unwrap().1,
        }
    );
    assert_eq!(read_all(&store, &flash), vec![0xEE; 100]);
}

#[test]
fn test_write_too_large() {
    let mut mem = blank();
    let mut flash = driver(&mut mem);
    let mut store = open(&mut flash);
    let data = vec![0u8; (REGION.size - HEADER_SIZE) as usize];

    assert_eq!(
        store.write(&mut flash, &data),
        Err(StoreError::TooLarge {
            len: data.len(),
            capacity: REGION.size,
        })
    );
    assert_eq!(flash.controller().stats().programs, 0);
}

#[test]
fn test_write_largest_payload() {
    let mut mem = blank();
    let mut flash = driver(&mut mem);
    let mut store = open(&mut flash);
    let data = vec![0x42u8; (REGION.size - HEADER_SIZE - 8) as usize];

    store.write(&mut flash, &data).unwrap();
    assert_eq!(read_all(&store, &flash), data);
}

// =============================================================================
// corruption tests
// =============================================================================

#[test]
fn test_payload_bit_flip_is_detected() {
    let mut mem = blank();
    let mut flash = driver(&mut mem);
    let mut store = open(&mut flash);
    store.write(&mut flash, &[0xF0; 16]).unwrap();

    flash.program(REGION.start + HEADER_SIZE, &[0x70]).unwrap();

    assert_eq!(
        store.reload(&flash),
        Lookup::Corrupt(CorruptKind::Checksum)
    );
    assert!(store.is_empty());

    let reopened = open(&mut flash);
    assert!(reopened.is_empty());
    assert!(reopened.is_blank(&mut flash));
}

#[test]
fn test_corrupt_chain_is_rewritten_from_start() {
    let mut mem = blank();
    let mut flash = driver(&mut mem);
    let mut store = open(&mut flash);
    store.write(&mut flash, b"one").unwrap();
    flash
        .program(REGION.start, &[0, 0, 0, 0, 0x12, 0x12, 0x12, 0x12])
        .unwrap();

    store.write(&mut flash, b"two").unwrap();

    assert_eq!(flash.controller().stats().erases, 1);
    assert_eq!(read_all(&store, &flash), b"two");
    assert_eq!(store.records(&flash).count(), 1);
}

// =============================================================================
// erase escalation tests
// =============================================================================

/// Controller whose program commands always fail.
struct NoProgram<'m>(SimFlash<'m>);

impl FlashController for NoProgram<'_> {
    fn read(&self, addr: u32, buf: &mut [u8]) {
        self.0.read(addr, buf)
    }

    fn launch(&mut self, cmd: &FlashCommand) -> FlashStatus {
        match cmd {
            FlashCommand::ProgramPhrase { .. } => FlashStatus::failed(FlashStatus::MGSTAT0),
            _ => self.0.launch(cmd),
        }
    }
}

#[test]
fn test_erase_limit() {
    let mut mem = blank();
    let mut flash = FlashDriver::without_interrupts(NoProgram(SimFlash::new(&mut mem, GEOM)), GEOM);
    let mut store = RecordStore::open(&mut flash, REGION.start, REGION.size).unwrap();

    assert_eq!(store.write(&mut flash, b"data"), Err(StoreError::EraseLimit));
    assert_eq!(
        flash.controller().0.stats().erases,
        MAX_ERASE_ATTEMPTS as u32
    );
}

#[test]
fn test_erase_failure_is_reported() {
    let mut mem = blank();
    let mut flash = driver(&mut mem);
    let mut store = open(&mut flash);
    flash.program(REGION.start, &[0x12; 8]).unwrap();
    flash
        .controller_mut()
        .inject_failures(1, FlashStatus::failed(FlashStatus::FPVIOL));

    assert!(matches!(
        store.write(&mut flash, b"data"),
        Err(StoreError::Erase(_))
    ));
}

// =============================================================================
// power loss tests
// =============================================================================

#[test]
fn test_power_loss_after_invalidate_leaves_store_empty() {
    let mut mem = blank();
    let mut flash = driver(&mut mem);
    let mut store = open(&mut flash);
    store.write(&mut flash, b"old").unwrap();

    // The invalidation lands, the new header does not.
    flash.controller_mut().cut_power_after(1);
    assert!(store.write(&mut flash, b"new").is_err());
    flash.controller_mut().restore_power();

    assert!(matches!(find_active(&flash, &REGION), Lookup::Empty(_)));

    let reopened = open(&mut flash);
    assert!(reopened.is_empty());
    assert!(matches!(find_active(&flash, &REGION), Lookup::Empty(_)));
}

#[test]
fn test_power_loss_at_every_step_keeps_one_record() {
    for budget in 0..8 {
        let mut mem = blank();
        let mut flash = driver(&mut mem);
        let mut store = open(&mut flash);
        store.write(&mut flash, b"old payload").unwrap();

        flash.controller_mut().cut_power_after(budget);
        let _ = store.write(&mut flash, b"new payload!");
        flash.controller_mut().restore_power();

        let reopened = open(&mut flash);
        let active = reopened
            .records(&flash)
            .filter(|(_, h)| h.state() == Some(RecordState::Active))
            .count();
        assert!(active <= 1, "budget {budget}: {active} active records");

        let data = read_all(&reopened, &flash);
        assert!(
            data.is_empty() || data == b"old payload" || data == b"new payload!",
            "budget {budget}: unexpected payload {data:?}"
        );
    }
}

// =============================================================================
// typed record tests
// =============================================================================

#[test]
fn test_read_type_empty() {
    let mut mem = blank();
    let mut flash = driver(&mut mem);
    let store = open(&mut flash);

    let (info, size) = store.read_type::<ProgInfo, _, _>(&flash).unwrap();
    assert_eq!(info, ProgInfo::default());
    assert_eq!(size, ReadSize::Empty);
    assert_eq!(size.signed(), 0);
}

#[test]
fn test_read_type_short_and_truncated() {
    let mut mem = blank();
    let mut flash = driver(&mut mem);
    let mut store = open(&mut flash);

    store.write(&mut flash, &[1, 0, 0, 0]).unwrap();
    let (info, size) = store.read_type::<ProgInfo, _, _>(&flash).unwrap();
    assert!(info.update_pending());
    assert_eq!(size, ReadSize::Fits(4));

    store.write(&mut flash, &[0u8; 60]).unwrap();
    let (_, size) = store.read_type::<ProgInfo, _, _>(&flash).unwrap();
    assert_eq!(size, ReadSize::Truncated(8));
    assert_eq!(size.signed(), -8);
}

#[test]
fn test_write_type_round_trip() {
    let mut mem = blank();
    let mut flash = driver(&mut mem);
    let mut store = open(&mut flash);

    let mut info = ProgInfo::default();
    info.firmware[1].valid = true;
    info.firmware[1].version_build = 77;
    store.write_type(&mut flash, &info).unwrap();

    let (back, size) = store.read_type::<ProgInfo, _, _>(&flash).unwrap();
    assert_eq!(back, info);
    assert_eq!(size, ReadSize::Fits(52));
}
