// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Unit tests for protocol types and their COBS framing.

use fwup_common::protocol::{MAX_FRAME_SIZE, RAM_UPDATE_FLAG_ADDR, RAM_UPDATE_MAGIC};
use fwup_common::{
    AckStatus, Command, FirmwareInfo, FlashError, ProgError, ProgInitParams, ProgPhase, Response,
    StoreError, UpdateOutcome, MAX_BLOCK_SIZE,
};

fn encode(cmd: &Command) -> Vec<u8> {
    let mut buf = [0u8; MAX_FRAME_SIZE];
    postcard::to_slice_cobs(cmd, &mut buf).unwrap().to_vec()
}

// =============================================================================
// constants
// =============================================================================

#[test]
fn test_max_block_size() {
    assert_eq!(MAX_BLOCK_SIZE, 1024);
}

#[test]
fn test_ram_update_constants() {
    assert_eq!(RAM_UPDATE_FLAG_ADDR, 0x2003_BFF0);
    assert_eq!(RAM_UPDATE_MAGIC, 0x0FDA_7E00);
}

// =============================================================================
// Command framing
// =============================================================================

#[test]
fn test_frames_end_with_delimiter() {
    let frame = encode(&Command::GetStatus);
    assert_eq!(frame.last(), Some(&0));
    assert!(!frame[..frame.len() - 1].contains(&0));
}

#[test]
fn test_prog_init_frame() {
    let params = ProgInitParams {
        section: 1,
        length: 4096,
        checksum: 0xDEAD_BEEF,
        hash: [0xA5; 20],
        ..Default::default()
    };
    let mut frame = encode(&Command::ProgInit(params));

    match postcard::from_bytes_cobs::<Command>(&mut frame).unwrap() {
        Command::ProgInit(back) => assert_eq!(back, params),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_scratch_frame_with_full_block() {
    let data: Vec<u8> = (0..MAX_BLOCK_SIZE).map(|i| i as u8).collect();
    let cmd = Command::scratch(&data).unwrap();
    let mut frame = encode(&cmd);
    assert!(frame.len() <= MAX_FRAME_SIZE);

    match postcard::from_bytes_cobs::<Command>(&mut frame).unwrap() {
        Command::ProgScratch { data: back } => assert_eq!(&back[..], &data[..]),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_scratch_rejects_oversized_block() {
    assert!(Command::scratch(&[0u8; MAX_BLOCK_SIZE + 1]).is_none());
}

#[test]
fn test_status_response_frame() {
    let main = FirmwareInfo {
        valid: true,
        part_number: 1227,
        version_major: 1,
        version_minor: 4,
        version_build: 9,
        checksum: 0x1234_5678,
    };
    let resp = Response::Status {
        phase: ProgPhase::Receiving {
            received: 512,
            expected: 4096,
        },
        update_pending: true,
        boot: FirmwareInfo::default(),
        main,
    };
    let mut buf = [0u8; 128];
    let frame = postcard::to_slice_cobs(&resp, &mut buf).unwrap();

    match postcard::from_bytes_cobs::<Response>(frame).unwrap() {
        Response::Status {
            phase,
            update_pending,
            boot,
            main: back,
        } => {
            assert_eq!(
                phase,
                ProgPhase::Receiving {
                    received: 512,
                    expected: 4096
                }
            );
            assert!(update_pending);
            assert_eq!(boot, FirmwareInfo::default());
            assert_eq!(back, main);
        }
        other => panic!("unexpected {other:?}"),
    }
}

// =============================================================================
// AckStatus mapping
// =============================================================================

#[test]
fn test_ack_from_prog_error() {
    let cases = [
        (ProgError::Init, AckStatus::InitError),
        (ProgError::Section, AckStatus::SectionError),
        (ProgError::Length, AckStatus::LengthError),
        (ProgError::Checksum, AckStatus::ChecksumError),
        (ProgError::Hash, AckStatus::HashError),
        (ProgError::Flash(FlashError::Access), AckStatus::FlashError),
        (ProgError::Store(StoreError::EraseLimit), AckStatus::FlashError),
    ];
    for (err, ack) in cases {
        assert_eq!(AckStatus::from(err), ack);
        assert!(!ack.is_ok());
    }
}

#[test]
fn test_ack_from_results() {
    assert_eq!(AckStatus::from(Ok::<(), ProgError>(())), AckStatus::Ok);
    assert_eq!(
        AckStatus::from(Ok::<_, ProgError>(UpdateOutcome::CopyNow)),
        AckStatus::CopyNow
    );
    assert_eq!(
        AckStatus::from(Err::<UpdateOutcome, _>(ProgError::Checksum)),
        AckStatus::ChecksumError
    );
    assert!(AckStatus::RebootRequired.is_ok());
}
