// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Boot management: pending copies, main image validation, and jump.

use embedded_hal::delay::DelayNs;
use fwup_common::boot::{decide, BootAction, VectorTable};
use fwup_common::protocol::{RAM_UPDATE_FLAG_ADDR, RAM_UPDATE_MAGIC};
use fwup_common::store::ReadSize;
use fwup_common::{ProgInfo, Region, Section};

use crate::flash;
use crate::update::Programmer;

unsafe extern "C" {
    static __fw_ram_base: u32;
    static __fw_copy_size: u32;
    static __fw_ram_start: u32;
    static __fw_ram_end: u32;
}

macro_rules! linker_addr {
    ($sym:ident) => {
        unsafe { &$sym as *const u32 as u32 }
    };
}

/// RAM window the main firmware is copied into and executes from.
pub struct MemoryLayout {
    pub ram_base: u32,
    pub copy_size: u32,
    pub ram: Region,
}

impl MemoryLayout {
    pub fn from_linker() -> Self {
        let start = linker_addr!(__fw_ram_start);
        let end = linker_addr!(__fw_ram_end);
        Self {
            ram_base: linker_addr!(__fw_ram_base),
            copy_size: linker_addr!(__fw_copy_size),
            ram: Region::new(start, end - start),
        }
    }
}

fn read_vectors(addr: u32) -> VectorTable {
    let mut bytes = [0u8; 8];
    flash::flash_read(addr, &mut bytes);
    VectorTable::from_bytes(&bytes)
}

/// Update mode is requested by the strap pin held low or by the RAM magic
/// word. The word is consumed.
pub fn check_update_trigger(pin_low: bool) -> bool {
    let ram_flag = unsafe { (RAM_UPDATE_FLAG_ADDR as *const u32).read_volatile() };
    unsafe {
        (RAM_UPDATE_FLAG_ADDR as *mut u32).write_volatile(0);
    }
    pin_low || ram_flag == RAM_UPDATE_MAGIC
}

/// Persisted prog info, or `None` if nothing was ever stored.
fn read_prog_info(prog: &Programmer) -> Option<ProgInfo> {
    let store = prog.info_store();
    match store.read_type::<ProgInfo, _, _>(prog.flash()) {
        Ok((_, ReadSize::Empty)) => None,
        Ok((info, _)) => Some(info),
        Err(e) => {
            defmt::println!("prog info read failed: {}", e);
            None
        }
    }
}

/// Decide what to do at reset. Completes a pending copy into the main
/// section before deciding again.
pub fn select(prog: &mut Programmer, update_requested: bool, layout: &MemoryLayout) -> BootAction {
    let main = prog.config().layout.main;

    loop {
        let info = read_prog_info(prog);
        let plausible = read_vectors(main.start).is_plausible(&layout.ram, &layout.ram);
        let action = decide(info.as_ref(), update_requested, plausible);

        if let Some(info) = &info {
            let fw = info.firmware(Section::Main);
            defmt::println!(
                "PROG_INFO: pending={}, main valid={} part={} v{}.{}.{} crc=0x{:08x}",
                info.update_pending(),
                fw.valid,
                fw.part_number,
                fw.version_major,
                fw.version_minor,
                fw.version_build,
                fw.checksum
            );
        }

        if action != BootAction::CompleteCopy {
            return action;
        }

        defmt::println!("Completing staged update");
        if let Err(e) = prog.update_copy() {
            defmt::println!("Staged copy failed: {}", e);
            return BootAction::EnterUpdateMode;
        }
    }
}

/// # Safety
/// The main section must hold an image linked for `layout.ram_base`.
pub unsafe fn load_and_jump(flash_addr: u32, layout: &MemoryLayout) -> ! {
    copy_firmware_to_ram(flash_addr, layout);

    // Reset peripherals before jumping so firmware SDK can reinitialize cleanly
    prepare_for_firmware_handoff();

    relocate_vector_table(layout.ram_base);

    let vt = VectorTable {
        initial_sp: (layout.ram_base as *const u32).read_volatile(),
        reset_vector: (layout.ram_base as *const u32).offset(1).read_volatile(),
    };
    jump_to_firmware(vt.initial_sp, vt.reset_vector);
}

/// Prepare the system for firmware handoff.
/// Clocks are left configured - SDK's runtime_init_clocks handles this
/// by switching away from PLLs before reconfiguring them.
unsafe fn prepare_for_firmware_handoff() {
    cortex_m::interrupt::disable();

    // Clear all pending interrupts in NVIC
    const NVIC_ICPR: *mut u32 = 0xE000_E280 as *mut u32;
    NVIC_ICPR.write_volatile(0xFFFF_FFFF);

    // Disable all NVIC interrupts
    const NVIC_ICER: *mut u32 = 0xE000_E180 as *mut u32;
    NVIC_ICER.write_volatile(0xFFFF_FFFF);
}

unsafe fn copy_firmware_to_ram(flash_addr: u32, layout: &MemoryLayout) {
    core::ptr::copy_nonoverlapping(
        flash_addr as *const u32,
        layout.ram_base as *mut u32,
        layout.copy_size as usize / 4,
    );
}

unsafe fn relocate_vector_table(ram_base: u32) {
    cortex_m::interrupt::disable();

    const SCB_VTOR: *mut u32 = 0xE000_ED08 as *mut u32;
    SCB_VTOR.write_volatile(ram_base);

    cortex_m::asm::dsb();
    cortex_m::asm::isb();
}

unsafe fn jump_to_firmware(initial_sp: u32, reset_vector: u32) -> ! {
    core::arch::asm!(
        "msr msp, {sp}",
        "cpsie i",  // Re-enable interrupts before jumping (SDK expects PRIMASK=0)
        "bx {reset}",
        sp = in(reg) initial_sp,
        reset = in(reg) reset_vector,
        options(noreturn)
    );
}

/// Jump to the main section.
pub fn start_main(p: &mut crate::peripherals::Peripherals, main: Region, layout: &MemoryLayout) -> ! {
    defmt::println!(
        "Loading main from 0x{:08x} to 0x{:08x} ({}KB)",
        main.start,
        layout.ram_base,
        layout.copy_size / 1024
    );
    defmt::println!("Jumping to firmware...");
    p.timer.delay_ms(10u32);

    unsafe { load_and_jump(main.start, layout) }
}
