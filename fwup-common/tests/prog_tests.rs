// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Firmware programmer tests: session checks, staging, copy and power loss.

use fwup_common::boot::{decide, BootAction};
use fwup_common::auth::{backdoor_key, block_key, DEMO_HASH_KEY};
use fwup_common::flash::FlashConfig;
use fwup_common::xxtea;
use fwup_common::{
    ActionListener, DataFormat, FirmwareIdentity, FlashDriver, FlashError, FlashGeometry,
    FlashLayout, FlashProgrammer, HardwareInfo, ProgAction, ProgConfig, ProgError, ProgInitParams,
    ProgPhase, Section, SimFlash, UpdateOutcome, CRC32,
};

const GEOM: FlashGeometry = FlashGeometry::K60;
const LAYOUT: FlashLayout = FlashLayout::K60;

#[derive(Default)]
struct Actions(Vec<ProgAction>);

impl ActionListener for Actions {
    fn on_action(&mut self, action: ProgAction) {
        self.0.push(action);
    }
}

type Programmer<'m> = FlashProgrammer<SimFlash<'m>, fwup_common::NoInterrupts, Actions>;

fn blank() -> Vec<u8> {
    vec![0xFF; GEOM.size as usize]
}

fn identity(section: Section) -> FirmwareIdentity {
    FirmwareIdentity {
        section,
        part_number: 1227,
        version_major: 1,
        version_minor: 2,
        version_build: 3,
    }
}

fn programmer_with(mem: &mut [u8], config: ProgConfig) -> Programmer<'_> {
    let flash = FlashDriver::without_interrupts(SimFlash::new(mem, GEOM), GEOM);
    FlashProgrammer::new(flash, config)
        .unwrap()
        .with_listener(Actions::default())
}

/// Programmer running from `executing`.
fn programmer(mem: &mut [u8], executing: Section) -> Programmer<'_> {
    let config = ProgConfig::new(LAYOUT, DEMO_HASH_KEY, identity(executing)).unwrap();
    programmer_with(mem, config)
}

fn params(target: Section, image: &[u8], format: DataFormat) -> ProgInitParams {
    ProgInitParams {
        section: target as u8,
        data_format: format as u8,
        length: image.len() as u32,
        checksum: CRC32.checksum(image),
        ..Default::default()
    }
    .sign(DEMO_HASH_KEY)
    .unwrap()
}

fn resign(params: ProgInitParams) -> ProgInitParams {
    params.sign(DEMO_HASH_KEY).unwrap()
}

fn stage(prog: &mut Programmer<'_>, target: Section, image: &[u8]) -> UpdateOutcome {
    prog.prog_init(&params(target, image, DataFormat::Binary))
        .unwrap();
    prog.prog_scratch(&mut image.to_vec()).unwrap();
    prog.prog_update().unwrap()
}

fn read(prog: &Programmer<'_>, addr: u32, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    prog.flash().read(addr, &mut buf).unwrap();
    buf
}

// =============================================================================
// prog_init tests
// =============================================================================

#[test]
fn test_init_arms_session_and_erases_scratch() {
    let mut mem = blank();
    mem[LAYOUT.scratch.start as usize..][..16].fill(0);
    let mut prog = programmer(&mut mem, Section::Boot);

    prog.prog_init(&params(Section::Main, &[0u8; 64], DataFormat::Binary))
        .unwrap();

    assert_eq!(prog.phase(), ProgPhase::Armed);
    assert_eq!(read(&prog, LAYOUT.scratch.start, 16), vec![0xFF; 16]);
    assert_eq!(
        prog.flash().controller().stats().erases,
        LAYOUT.scratch.size / GEOM.sector_size
    );
    assert_eq!(prog.listener().0, vec![ProgAction::Init]);
}

#[test]
fn test_init_rejects_bad_hash() {
    let mut mem = blank();
    let mut prog = programmer(&mut mem, Section::Boot);
    let mut p = params(Section::Main, &[0u8; 64], DataFormat::Binary);
    p.hash[7] ^= 0x01;

    assert_eq!(prog.prog_init(&p), Err(ProgError::Hash));
    assert_eq!(prog.phase(), ProgPhase::Idle);
    assert_eq!(prog.flash().controller().stats().erases, 0);
}

#[test]
fn test_init_hash_covers_every_field() {
    let mut mem = blank();
    let mut prog = programmer(&mut mem, Section::Boot);
    let signed = params(Section::Main, &[0u8; 64], DataFormat::Binary);
    let tampered = ProgInitParams {
        length: 128,
        ..signed
    };

    assert_eq!(prog.prog_init(&tampered), Err(ProgError::Hash));
}

#[test]
fn test_init_hardware_filters() {
    let mut mem = blank();
    let mut prog = programmer(&mut mem, Section::Boot);
    prog.set_hardware_info(Some(HardwareInfo {
        part_number: 1227,
        part_revision: 3,
        serial_number: 4242,
        ..Default::default()
    }));
    let base = params(Section::Main, &[0u8; 16], DataFormat::Binary);

    let rejected = [
        ProgInitParams { part_number: 1300, ..base },
        ProgInitParams { part_rev_min: 4, ..base },
        ProgInitParams { part_rev_max: 2, ..base },
        ProgInitParams { serial_number: 1, ..base },
    ];
    for p in rejected {
        assert_eq!(prog.prog_init(&resign(p)), Err(ProgError::Init), "{p:?}");
    }

    let exact = ProgInitParams {
        part_number: 1227,
        part_rev_min: 3,
        part_rev_max: 3,
        serial_number: 4242,
        ..base
    };
    assert_eq!(prog.prog_init(&resign(exact)), Ok(()));
    assert_eq!(prog.prog_init(&base), Ok(()));
}

#[test]
fn test_init_without_hardware_info_ignores_filters() {
    let mut mem = blank();
    let mut prog = programmer(&mut mem, Section::Boot);
    let p = ProgInitParams {
        part_number: 9999,
        serial_number: 1,
        ..params(Section::Main, &[0u8; 16], DataFormat::Binary)
    };

    assert_eq!(prog.prog_init(&resign(p)), Ok(()));
}

#[test]
fn test_init_rejects_unsupported_formats() {
    let mut mem = blank();
    let mut prog = programmer(&mut mem, Section::Boot);

    for format in [DataFormat::Compressed, DataFormat::EncryptedCompressed] {
        let p = params(Section::Main, &[0u8; 16], format);
        assert_eq!(prog.prog_init(&p), Err(ProgError::Init));
    }

    let unknown = ProgInitParams {
        data_format: 9,
        ..params(Section::Main, &[0u8; 16], DataFormat::Binary)
    };
    assert_eq!(prog.prog_init(&resign(unknown)), Err(ProgError::Init));
}

#[test]
fn test_init_rejects_unknown_section() {
    let mut mem = blank();
    let mut prog = programmer(&mut mem, Section::Main);
    let p = ProgInitParams {
        section: 2,
        ..params(Section::Main, &[0u8; 16], DataFormat::Binary)
    };

    assert_eq!(prog.prog_init(&resign(p)), Err(ProgError::Section));
}

#[test]
fn test_bootloader_cannot_overwrite_itself() {
    let mut mem = blank();
    let mut prog = programmer(&mut mem, Section::Boot);

    assert_eq!(
        prog.prog_init(&params(Section::Boot, &[0u8; 64], DataFormat::Binary)),
        Err(ProgError::Section)
    );
    assert_eq!(prog.flash().controller().stats().erases, 0);
    assert_eq!(prog.phase(), ProgPhase::Idle);
}

#[test]
fn test_init_rejects_oversized_image() {
    let mut mem = blank();
    let mut prog = programmer(&mut mem, Section::Main);
    let p = ProgInitParams {
        length: LAYOUT.boot.size + 8,
        ..params(Section::Boot, &[0u8; 16], DataFormat::Binary)
    };

    assert_eq!(prog.prog_init(&resign(p)), Err(ProgError::Length));
    assert_eq!(prog.flash().controller().stats().erases, 0);
}

#[test]
fn test_init_scratch_erase_failure() {
    let mut mem = blank();
    let mut prog = programmer(&mut mem, Section::Boot);
    prog.flash_mut()
        .controller_mut()
        .inject_failures(1, fwup_common::FlashStatus::failed(fwup_common::FlashStatus::FPVIOL));

    assert_eq!(
        prog.prog_init(&params(Section::Main, &[0u8; 16], DataFormat::Binary)),
        Err(ProgError::Flash(FlashError::ProtectionViolation))
    );
    assert_eq!(prog.phase(), ProgPhase::Idle);
}

// =============================================================================
// prog_scratch tests
// =============================================================================

#[test]
fn test_scratch_requires_session() {
    let mut mem = blank();
    let mut prog = programmer(&mut mem, Section::Boot);

    assert_eq!(prog.prog_scratch(&mut [0u8; 16]), Err(ProgError::Init));
    assert_eq!(prog.prog_update(), Err(ProgError::Init));
}

#[test]
fn test_scratch_bad_length_ends_session() {
    let mut mem = blank();
    let mut prog = programmer(&mut mem, Section::Boot);
    prog.prog_init(&params(Section::Main, &[0u8; 64], DataFormat::Binary))
        .unwrap();

    assert_eq!(prog.prog_scratch(&mut [0u8; 5]), Err(ProgError::Length));
    assert_eq!(prog.prog_scratch(&mut [0u8; 8]), Err(ProgError::Init));
}

#[test]
fn test_scratch_minimum_block() {
    let mut mem = blank();
    let mut prog = programmer(&mut mem, Section::Boot);
    prog.prog_init(&params(Section::Main, &[0u8; 64], DataFormat::Binary))
        .unwrap();

    assert_eq!(prog.prog_scratch(&mut [0u8; 4]), Err(ProgError::Length));
}

#[test]
fn test_scratch_reports_progress() {
    let mut mem = blank();
    let mut prog = programmer(&mut mem, Section::Boot);
    let image: Vec<u8> = (0..64).collect();
    prog.prog_init(&params(Section::Main, &image, DataFormat::Binary))
        .unwrap();

    prog.prog_scratch(&mut image[..24].to_vec()).unwrap();
    assert_eq!(
        prog.phase(),
        ProgPhase::Receiving {
            received: 24,
            expected: 64
        }
    );

    prog.prog_scratch(&mut image[24..].to_vec()).unwrap();
    assert_eq!(prog.phase(), ProgPhase::Ready);
    assert_eq!(read(&prog, LAYOUT.scratch.start, 64), image);
}

#[test]
fn test_scratch_blocks_off_phrase_alignment() {
    let mut mem = blank();
    let mut prog = programmer(&mut mem, Section::Boot);
    let image: Vec<u8> = (0..36).map(|i| 0x80 | i as u8).collect();
    prog.prog_init(&params(Section::Main, &image, DataFormat::Binary))
        .unwrap();

    for block in image.chunks(12) {
        prog.prog_scratch(&mut block.to_vec()).unwrap();
    }

    assert_eq!(read(&prog, LAYOUT.scratch.start, 36), image);
    assert_eq!(read(&prog, LAYOUT.scratch.start + 36, 4), vec![0xFF; 4]);
    assert_eq!(prog.prog_update(), Ok(UpdateOutcome::RebootRequired));
}

#[test]
fn test_scratch_flash_failure_ends_session() {
    let mut mem = blank();
    let mut prog = programmer(&mut mem, Section::Boot);
    prog.prog_init(&params(Section::Main, &[0u8; 16], DataFormat::Binary))
        .unwrap();
    prog.flash_mut()
        .controller_mut()
        .inject_failures(1, fwup_common::FlashStatus::failed(fwup_common::FlashStatus::ACCERR));

    assert_eq!(
        prog.prog_scratch(&mut [0u8; 16]),
        Err(ProgError::Flash(FlashError::Access))
    );
    assert_eq!(prog.phase(), ProgPhase::Idle);
}

#[test]
fn test_encrypted_blocks_are_decrypted() {
    let mut mem = blank();
    let mut prog = programmer(&mut mem, Section::Boot);
    let image: Vec<u8> = (0..96u32).map(|i| (i * 13 + 5) as u8).collect();
    prog.prog_init(&params(Section::Main, &image, DataFormat::Encrypted))
        .unwrap();

    for (i, block) in image.chunks(32).enumerate() {
        let mut cipher = block.to_vec();
        xxtea::encrypt(&mut cipher, &block_key(DEMO_HASH_KEY, i as u16));
        assert_ne!(cipher, block);
        prog.prog_scratch(&mut cipher).unwrap();
    }

    assert_eq!(read(&prog, LAYOUT.scratch.start, image.len()), image);
    assert_eq!(prog.prog_update(), Ok(UpdateOutcome::RebootRequired));
}

#[test]
fn test_encrypted_blocks_out_of_order_fail_checksum() {
    let mut mem = blank();
    let mut prog = programmer(&mut mem, Section::Boot);
    let image: Vec<u8> = (0..64u32).map(|i| i as u8).collect();
    prog.prog_init(&params(Section::Main, &image, DataFormat::Encrypted))
        .unwrap();

    for (i, block) in image.chunks(32).enumerate() {
        let mut cipher = block.to_vec();
        xxtea::encrypt(&mut cipher, &block_key(DEMO_HASH_KEY, 1 - i as u16));
        prog.prog_scratch(&mut cipher).unwrap();
    }

    assert_eq!(prog.prog_update(), Err(ProgError::Checksum));
}

// =============================================================================
// prog_update tests
// =============================================================================

#[test]
fn test_checksum_gate() {
    let mut mem = blank();
    let mut prog = programmer(&mut mem, Section::Boot);
    let image = [0u8; 100];
    let p = ProgInitParams {
        checksum: 0xDEAD_BEEF,
        ..params(Section::Main, &image, DataFormat::Binary)
    };
    prog.prog_init(&resign(p)).unwrap();
    prog.prog_scratch(&mut image.to_vec()).unwrap();

    assert_eq!(prog.prog_update(), Err(ProgError::Checksum));
    assert_eq!(prog.phase(), ProgPhase::Idle);
    assert!(!prog.read_info().unwrap().update_pending());
    assert_eq!(prog.prog_scratch(&mut [0u8; 8]), Err(ProgError::Init));
}

#[test]
fn test_update_requires_full_image() {
    let mut mem = blank();
    let mut prog = programmer(&mut mem, Section::Boot);
    prog.prog_init(&params(Section::Main, &[0u8; 64], DataFormat::Binary))
        .unwrap();
    prog.prog_scratch(&mut [0u8; 32]).unwrap();

    assert_eq!(prog.prog_update(), Err(ProgError::Length));
    assert!(!prog.read_info().unwrap().update_pending());
}

#[test]
fn test_update_persists_intent() {
    let mut mem = blank();
    let mut prog = programmer(&mut mem, Section::Boot);
    prog.update_firmware_info().unwrap();
    let image = [0u8; 64];

    assert_eq!(
        stage(&mut prog, Section::Main, &image),
        UpdateOutcome::RebootRequired
    );

    let info = prog.read_info().unwrap();
    assert!(info.update_pending());
    assert_eq!(info.flash_update.src_addr, LAYOUT.scratch.start);
    assert_eq!(info.flash_update.src_length, 64);
    assert_eq!(info.flash_update.src_checksum, CRC32.checksum(&image));
    assert_eq!(info.flash_update.dest_section, Section::Main as u8);
    assert_eq!(info.flash_update.dest_addr, LAYOUT.main.start);
    assert_eq!(info.flash_update.dest_size, LAYOUT.main.size);
    assert!(!info.firmware(Section::Main).valid);
    assert_eq!(info.firmware(Section::Main).checksum, CRC32.checksum(&image));
    assert!(info.firmware(Section::Boot).valid);
    assert_eq!(prog.phase(), ProgPhase::Idle);
    assert_eq!(
        prog.listener().0,
        vec![ProgAction::Init, ProgAction::UpdateStaged]
    );
}

#[test]
fn test_main_updating_boot_copies_now() {
    let mut mem = blank();
    let mut prog = programmer(&mut mem, Section::Main);
    assert_eq!(
        stage(&mut prog, Section::Boot, &[0x5A; 32]),
        UpdateOutcome::CopyNow
    );

    prog.update_copy().unwrap();
    assert_eq!(read(&prog, LAYOUT.boot.start, 32), vec![0x5A; 32]);
}

#[test]
fn test_main_updating_main_requires_reboot() {
    let mut mem = blank();
    let mut prog = programmer(&mut mem, Section::Main);
    assert_eq!(
        stage(&mut prog, Section::Main, &[0x5A; 32]),
        UpdateOutcome::RebootRequired
    );

    // Only the bootloader may complete this one.
    assert_eq!(prog.update_copy(), Err(ProgError::Section));
    assert!(prog.read_info().unwrap().update_pending());
}

// =============================================================================
// update_copy tests
// =============================================================================

#[test]
fn test_stage_and_commit() {
    let mut mem = blank();
    let mut prog = programmer(&mut mem, Section::Boot);
    let image = [0u8; 64];
    stage(&mut prog, Section::Main, &image);

    prog.update_copy().unwrap();

    let info = prog.read_info().unwrap();
    assert!(!info.update_pending());
    assert!(info.firmware(Section::Main).valid);
    assert_eq!(info.firmware(Section::Main).checksum, CRC32.checksum(&image));
    assert_eq!(read(&prog, LAYOUT.main.start, 64), image.to_vec());
    assert_eq!(read(&prog, LAYOUT.main.start + 64, 8), vec![0xFF; 8]);
    assert_eq!(
        prog.listener().0,
        vec![
            ProgAction::Init,
            ProgAction::UpdateStaged,
            ProgAction::CopyStart,
            ProgAction::CopyDone
        ]
    );
}

#[test]
fn test_copy_without_intent() {
    let mut mem = blank();
    let mut prog = programmer(&mut mem, Section::Boot);

    assert_eq!(prog.update_copy(), Err(ProgError::Init));
    assert!(prog.listener().0.is_empty());
}

#[test]
fn test_copy_rechecks_scratch() {
    let mut mem = blank();
    let mut prog = programmer(&mut mem, Section::Boot);
    stage(&mut prog, Section::Main, &[0xF0; 64]);

    prog.flash_mut()
        .program(LAYOUT.scratch.start, &[0x70])
        .unwrap();

    assert_eq!(prog.update_copy(), Err(ProgError::Checksum));
    assert!(prog.read_info().unwrap().update_pending());
    assert_eq!(read(&prog, LAYOUT.main.start, 8), vec![0xFF; 8]);
}

#[test]
fn test_copy_secures_part() {
    let mut mem = blank();
    let mut prog = programmer(&mut mem, Section::Boot);
    stage(&mut prog, Section::Main, &[0u8; 16]);

    prog.update_copy().unwrap();

    let cfg = prog.flash().config_read().unwrap();
    assert_eq!(cfg.fsec, FlashConfig::FSEC_SECURE);
    assert_eq!(cfg.key, backdoor_key(DEMO_HASH_KEY));

    prog.unsecure_backdoor().unwrap();
    assert!(prog.flash().controller().unlocked());
}

#[test]
fn test_copy_keeps_part_open_when_not_securing() {
    let mut mem = blank();
    let mut config = ProgConfig::new(LAYOUT, DEMO_HASH_KEY, identity(Section::Boot)).unwrap();
    config.secure_on_copy = false;
    let mut prog = programmer_with(&mut mem, config);
    stage(&mut prog, Section::Main, &[0u8; 16]);

    prog.update_copy().unwrap();

    let cfg = prog.flash().config_read().unwrap();
    assert!(cfg.is_unsecured());
    assert_eq!(cfg.key, backdoor_key(DEMO_HASH_KEY));
}

#[test]
fn test_power_loss_during_copy_is_recoverable() {
    let mut mem = blank();
    let mut prog = programmer(&mut mem, Section::Boot);
    let image: Vec<u8> = (0..200u32).map(|i| i as u8).collect();
    stage(&mut prog, Section::Main, &image);

    prog.flash_mut().controller_mut().cut_power_after(3);
    assert!(matches!(prog.update_copy(), Err(ProgError::Flash(_))));
    assert_eq!(prog.listener().0.last(), Some(&ProgAction::CopyError));
    prog.flash_mut().controller_mut().restore_power();

    let info = prog.read_info().unwrap();
    assert!(info.update_pending());
    assert!(!info.firmware(Section::Main).valid);

    prog.update_copy().unwrap();
    assert_eq!(read(&prog, LAYOUT.main.start, image.len()), image);
    assert!(prog.read_info().unwrap().firmware(Section::Main).valid);
}

#[test]
fn test_cleared_after_failed_first_copy_is_not_booted() {
    let mut mem = blank();
    let mut prog = programmer(&mut mem, Section::Boot);
    prog.update_firmware_info().unwrap();
    let image: Vec<u8> = (0..512u32).map(|i| i as u8).collect();
    stage(&mut prog, Section::Main, &image);

    // Main is erased and its first phrases land before power goes.
    let sectors = LAYOUT.main.size / GEOM.sector_size;
    prog.flash_mut().controller_mut().cut_power_after(sectors + 5);
    assert!(prog.update_copy().is_err());
    prog.flash_mut().controller_mut().restore_power();
    assert_eq!(read(&prog, LAYOUT.main.start, 8), image[..8]);

    prog.update_clear().unwrap();
    let info = prog.read_info().unwrap();
    assert!(!info.update_pending());
    assert_eq!(
        decide(Some(&info), false, true),
        BootAction::EnterUpdateMode
    );
}

// =============================================================================
// update_clear / update_firmware_info tests
// =============================================================================

#[test]
fn test_update_clear_drops_intent() {
    let mut mem = blank();
    let mut prog = programmer(&mut mem, Section::Boot);
    stage(&mut prog, Section::Main, &[0u8; 16]);

    prog.update_clear().unwrap();

    assert!(!prog.read_info().unwrap().update_pending());
    assert_eq!(prog.update_copy(), Err(ProgError::Init));
}

#[test]
fn test_update_clear_without_intent_writes_nothing() {
    let mut mem = blank();
    let mut prog = programmer(&mut mem, Section::Boot);
    prog.update_firmware_info().unwrap();
    prog.flash_mut().controller_mut().reset_stats();

    prog.update_clear().unwrap();
    assert_eq!(prog.flash().controller().stats().programs, 0);
}

#[test]
fn test_update_firmware_info_writes_once() {
    let mut mem = blank();
    let mut prog = programmer(&mut mem, Section::Boot);

    assert_eq!(prog.update_firmware_info(), Ok(true));
    let boot = *prog.read_info().unwrap().firmware(Section::Boot);
    assert!(boot.valid);
    assert_eq!(boot.part_number, 1227);
    assert_eq!(
        (boot.version_major, boot.version_minor, boot.version_build),
        (1, 2, 3)
    );

    prog.flash_mut().controller_mut().reset_stats();
    assert_eq!(prog.update_firmware_info(), Ok(false));
    assert_eq!(prog.flash().controller().stats().programs, 0);
}

#[test]
fn test_reset_keeps_persisted_intent() {
    let mut mem = blank();
    let mut prog = programmer(&mut mem, Section::Boot);
    stage(&mut prog, Section::Main, &[0u8; 16]);
    prog.prog_init(&params(Section::Main, &[0u8; 16], DataFormat::Binary))
        .unwrap();

    prog.prog_reset();

    assert_eq!(prog.phase(), ProgPhase::Idle);
    assert!(prog.read_info().unwrap().update_pending());
}

#[test]
fn test_backdoor_rejected_on_open_part() {
    let mut mem = blank();
    let mut prog = programmer(&mut mem, Section::Boot);
    assert_eq!(
        prog.unsecure_backdoor(),
        Err(ProgError::Flash(FlashError::Access))
    );
}
