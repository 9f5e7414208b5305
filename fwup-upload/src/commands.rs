// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Command implementations for bootloader operations.

use std::fs;
use std::io::Write;

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};

use fwup_common::protocol::{AckStatus, Command, Response};
use fwup_common::{
    DataFormat, FirmwareIdentity, FirmwareInfo, FlashDriver, FlashLayout, FlashProgrammer, ProgAction,
    ProgConfig, Section, SimFlash, UpdateOutcome,
};

use crate::cli::ImageArgs;
use crate::image::{self, PackedImage};
use crate::transport::{erase_timeout_ms, Transport};

/// The bootloader erases its whole scratch region on `ProgInit`.
const DEVICE_LAYOUT: FlashLayout = FlashLayout::RP2040;

fn progress_bar(len: u64) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
            )?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

fn print_firmware(name: &str, fw: &FirmwareInfo) {
    if fw.valid {
        println!(
            "  {:<6} part {} v{}.{}.{} (CRC32: 0x{:08x})",
            name, fw.part_number, fw.version_major, fw.version_minor, fw.version_build, fw.checksum
        );
    } else {
        println!("  {:<6} not valid", name);
    }
}

fn load(args: &ImageArgs) -> Result<PackedImage> {
    let firmware = fs::read(&args.file)
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let packed = image::pack(
        &firmware,
        args.section.into(),
        args.format.into(),
        args.target(),
        &args.key,
        args.block_size,
    )?;

    println!(
        "Firmware: {} ({} bytes, {} padded, CRC32: 0x{:08x})",
        args.file.display(),
        firmware.len(),
        packed.params.length,
        packed.params.checksum
    );
    println!(
        "Target:   {:?} section, {:?}, {} blocks",
        Section::from(args.section),
        DataFormat::from(args.format),
        packed.blocks.len()
    );
    println!();
    Ok(packed)
}

/// What a successful `ProgUpdate` ack means for the image. The device only
/// stages it; the copy happens on its side afterwards.
fn commit_message(status: AckStatus) -> &'static str {
    match status {
        AckStatus::CopyNow => "OK, staged; the device copies it now",
        AckStatus::RebootRequired => "OK, staged; copied on the next boot",
        _ => "OK",
    }
}

fn expect_ack(response: Response, what: &str) -> Result<AckStatus> {
    match response {
        Response::Ack(status) if status.is_ok() => Ok(status),
        Response::Ack(status) => bail!("{} failed: {:?}", what, status),
        _ => bail!("Unexpected response to {}: {:?}", what, response),
    }
}

pub fn status(transport: &mut Transport) -> Result<()> {
    match transport.send_recv(&Command::GetStatus)? {
        Response::Status {
            phase,
            update_pending,
            boot,
            main,
        } => {
            println!("Bootloader Status:");
            println!("  Session: {:?}", phase);
            println!("  Pending: {}", if update_pending { "yes" } else { "no" });
            print_firmware("Boot", &boot);
            print_firmware("Main", &main);
        }
        Response::Ack(status) => {
            println!("Unexpected ACK response: {:?}", status);
        }
    }

    Ok(())
}

/// Stream an image into scratch and commit it.
pub fn upload(transport: &mut Transport, args: &ImageArgs) -> Result<()> {
    let packed = load(args)?;

    print!("Starting session (erasing scratch)... ");
    std::io::stdout().flush()?;
    let timeout = erase_timeout_ms(DEVICE_LAYOUT.scratch.size);
    let response = transport.send_recv_timeout(&Command::ProgInit(packed.params), timeout)?;
    expect_ack(response, "ProgInit")?;
    println!("OK");

    let pb = progress_bar(packed.params.length as u64)?;
    let mut sent = 0u64;
    for (index, block) in packed.blocks.iter().enumerate() {
        let cmd = Command::scratch(block).context("Block exceeds frame size")?;
        let response = transport.send_recv(&cmd)?;
        if let Err(e) = expect_ack(response, "ProgScratch") {
            pb.abandon();
            return Err(e.context(format!("Block {} at offset {}", index, sent)));
        }
        sent += block.len() as u64;
        pb.set_position(sent);
    }
    pb.finish_with_message("Upload complete");
    println!();

    print!("Committing... ");
    std::io::stdout().flush()?;
    // The prog-info store may erase its sector while persisting the intent.
    let timeout = erase_timeout_ms(DEVICE_LAYOUT.prog_info.size);
    let response = transport.send_recv_timeout(&Command::ProgUpdate, timeout)?;
    let status = expect_ack(response, "ProgUpdate")?;
    println!("{}", commit_message(status));
    if status == AckStatus::RebootRequired {
        println!(
            "Use 'fwup-upload --port {} reboot' to complete the update.",
            transport.port_name()
        );
    }

    Ok(())
}

pub fn reset(transport: &mut Transport) -> Result<()> {
    expect_ack(transport.send_recv(&Command::ProgReset)?, "ProgReset")?;
    println!("Session aborted.");
    Ok(())
}

pub fn clear(transport: &mut Transport) -> Result<()> {
    expect_ack(transport.send_recv(&Command::UpdateClear)?, "UpdateClear")?;
    println!("Pending update cleared.");
    Ok(())
}

pub fn reboot(transport: &mut Transport) -> Result<()> {
    print!("Rebooting device... ");
    std::io::stdout().flush()?;
    expect_ack(transport.send_recv(&Command::Reboot)?, "Reboot")?;
    println!("OK");
    Ok(())
}

/// Run the whole staged update against a blank in-memory K60 array.
///
/// The simulated firmware executes from the section the image does not
/// target, so both sections can be exercised.
pub fn simulate(args: &ImageArgs) -> Result<()> {
    let packed = load(args)?;
    let section = Section::from(args.section);

    let layout = FlashLayout::K60;
    let mut mem = vec![0xFFu8; layout.geometry.size as usize];
    let identity = FirmwareIdentity {
        section: match section {
            Section::Boot => Section::Main,
            Section::Main => Section::Boot,
        },
        part_number: 0,
        version_major: 0,
        version_minor: 0,
        version_build: 0,
    };
    let config = ProgConfig::new(layout, &args.key, identity).context("Hash key too long")?;
    let sim = SimFlash::new(&mut mem, layout.geometry);
    let driver = FlashDriver::without_interrupts(sim, layout.geometry);
    let mut prog = FlashProgrammer::new(driver, config)?
        .with_listener(|action: ProgAction| println!("  [{:?}]", action));

    prog.prog_init(&packed.params)?;

    let pb = progress_bar(packed.params.length as u64)?;
    let mut sent = 0u64;
    for block in &packed.blocks {
        let mut block = block.clone();
        prog.prog_scratch(&mut block)?;
        sent += block.len() as u64;
        pb.set_position(sent);
    }
    pb.finish_and_clear();

    match prog.prog_update()? {
        UpdateOutcome::CopyNow => println!("Staged, copying now"),
        UpdateOutcome::RebootRequired => println!("Staged, copying as the bootloader would"),
    }
    prog.update_copy()?;

    let info = prog.read_info()?;
    println!("Result:");
    println!("  Pending: {}", if info.update_pending() { "yes" } else { "no" });
    print_firmware("Boot", info.firmware(Section::Boot));
    print_firmware("Main", info.firmware(Section::Main));

    let sim = prog.into_flash().into_controller();
    let stats = sim.stats();
    println!(
        "  Flash:  {} erases, {} programs, {} verifies",
        stats.erases, stats.programs, stats.verifies
    );

    let dest = layout.section(section);
    let start = (dest.start - layout.geometry.base) as usize;
    let written = &sim.memory()[start..start + packed.plain.len()];
    let config = layout.geometry.config.filter(|cfg| dest.contains(cfg.start));
    let mismatch = written.iter().zip(&packed.plain).enumerate().any(|(i, (a, b))| {
        let addr = dest.start + i as u32;
        a != b && !config.is_some_and(|cfg| cfg.contains(addr))
    });
    if mismatch {
        bail!("Section content does not match the image");
    }
    println!("Section content verified.");

    Ok(())
}
