// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Firmware update protocol over USB CDC.
//!
//! Commands map one-to-one onto programmer operations:
//! - GetStatus: session phase, pending intent and both firmware identities
//! - ProgInit / ProgScratch / ProgUpdate / ProgReset: staged image upload
//! - UpdateClear: drop a persisted intent
//! - Reboot: restart the device (the next boot completes a staged copy)

use embedded_hal::digital::OutputPin;
use fwup_common::irq::CortexM;
use fwup_common::protocol::*;
use fwup_common::{FlashProgrammer, ProgAction, Section};
use rp2040_hal as hal;
use usb_device::class_prelude::UsbBusAllocator;

use crate::flash::RomFlash;
use crate::peripherals::{self, Peripherals};
use crate::usb_transport::UsbTransport;

pub type Programmer = FlashProgrammer<RomFlash, CortexM, fn(ProgAction)>;

pub fn log_action(action: ProgAction) {
    defmt::println!("prog action: {}", action);
}

/// Enter update mode: initialize USB and run the update loop.
pub fn enter_update_mode(p: &mut Peripherals, prog: &mut Programmer) -> ! {
    defmt::println!("Update mode requested");

    fwup_common::blink(&mut p.status_led, &mut p.timer, 10, 50);

    let Some(mut usb) = p.usb.take() else {
        defmt::panic!("USB peripherals already taken");
    };

    let usb_bus = UsbBusAllocator::new(hal::usb::UsbBus::new(
        usb.regs,
        usb.dpram,
        usb.clock,
        true,
        &mut usb.resets,
    ));

    peripherals::store_usb_bus(usb_bus);
    let mut transport = UsbTransport::new(peripherals::usb_bus_ref());

    defmt::println!("USB CDC initialized, entering update loop");
    p.status_led.set_high().ok();

    run_update_mode(&mut transport, prog)
}

/// Run the update mode loop. Does not return (reboot via SCB::sys_reset).
pub fn run_update_mode(transport: &mut UsbTransport, prog: &mut Programmer) -> ! {
    loop {
        transport.poll();

        if let Some(cmd) = transport.try_receive() {
            handle_command(transport, prog, cmd);
        }
    }
}

/// Dispatch a command to its handler.
fn handle_command(transport: &mut UsbTransport, prog: &mut Programmer, cmd: Command) {
    let ack = match cmd {
        Command::GetStatus => return handle_get_status(transport, prog),
        Command::Reboot => handle_reboot(transport),
        Command::ProgInit(params) => {
            defmt::println!(
                "ProgInit: section={} len={} format={}",
                params.section,
                params.length,
                params.data_format
            );
            AckStatus::from(prog.prog_init(&params))
        }
        Command::ProgScratch { mut data } => AckStatus::from(prog.prog_scratch(&mut data)),
        Command::ProgUpdate => AckStatus::from(prog.prog_update()),
        Command::ProgReset => {
            prog.prog_reset();
            AckStatus::Ok
        }
        Command::UpdateClear => AckStatus::from(prog.update_clear()),
    };

    if !ack.is_ok() {
        defmt::println!("Command rejected: {}", ack);
    }
    transport.send(&Response::Ack(ack));
}

/// Handle GetStatus command: return current programmer status.
fn handle_get_status(transport: &mut UsbTransport, prog: &mut Programmer) {
    let info = match prog.read_info() {
        Ok(info) => info,
        Err(e) => {
            defmt::println!("prog info read failed: {}", e);
            transport.send(&Response::Ack(AckStatus::FlashError));
            return;
        }
    };

    transport.send(&Response::Status {
        phase: prog.phase(),
        update_pending: info.update_pending(),
        boot: *info.firmware(Section::Boot),
        main: *info.firmware(Section::Main),
    });
}

/// Handle Reboot command: send ACK and reset the system.
fn handle_reboot(transport: &mut UsbTransport) -> ! {
    transport.send(&Response::Ack(AckStatus::Ok));
    // Small delay to let the ACK be sent
    cortex_m::asm::delay(12_000_000); // ~1s at 12MHz
    cortex_m::peripheral::SCB::sys_reset();
}
