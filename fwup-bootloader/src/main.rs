// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! fwup bootloader for RP2040: completes staged copies, runs the USB CDC
//! update protocol and starts the main section.

#![no_std]
#![no_main]

mod boot;
mod flash;
mod peripherals;
mod update;
mod usb_transport;

use defmt_rtt as _;
use embedded_hal::digital::InputPin;
use fwup_common::boot::BootAction;
use fwup_common::irq::CortexM;
use fwup_common::{FirmwareIdentity, FlashDriver, FlashLayout, FlashProgrammer, ProgConfig, Section};
use panic_probe as _;

defmt::timestamp!("{=u64:us}", { 0 });

use cortex_m_rt::entry;

#[unsafe(link_section = ".boot2")]
#[used]
pub static BOOT2: [u8; 256] = rp2040_boot2::BOOT_LOADER_GENERIC_03H;

const HASH_KEY: &str = fwup_common::auth::DEMO_HASH_KEY;

const IDENTITY: FirmwareIdentity = FirmwareIdentity {
    section: Section::Boot,
    part_number: 2040,
    version_major: 1,
    version_minor: 0,
    version_build: 0,
};

#[entry]
fn main() -> ! {
    defmt::println!("Bootloader init");

    let mut p = peripherals::init();

    fwup_common::blink(&mut p.status_led, &mut p.timer, 3, 200);

    let layout = FlashLayout::RP2040;
    let Some(config) = ProgConfig::new(layout, HASH_KEY, IDENTITY) else {
        defmt::panic!("hash key too long");
    };
    let driver = FlashDriver::new(flash::RomFlash::init(), CortexM, layout.geometry);
    let mut prog = match FlashProgrammer::new(driver, config) {
        Ok(prog) => prog.with_listener(update::log_action as fn(_)),
        Err(e) => defmt::panic!("prog info store unavailable: {}", e),
    };

    match prog.update_firmware_info() {
        Ok(true) => defmt::println!("Bootloader identity registered"),
        Ok(false) => {}
        Err(e) => defmt::println!("Identity update failed: {}", e),
    }

    let update_pin_low = p.update_pin.is_low().unwrap_or(false);
    let mem = boot::MemoryLayout::from_linker();

    match boot::select(&mut prog, boot::check_update_trigger(update_pin_low), &mem) {
        BootAction::StartMain => boot::start_main(&mut p, layout.main, &mem),
        BootAction::EnterUpdateMode | BootAction::CompleteCopy => {
            update::enter_update_mode(&mut p, &mut prog)
        }
    }
}
