// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Firmware packer and upload tool for fwup-bootloader via USB CDC.
//!
//! Usage:
//!   fwup-upload --port /dev/ttyACM0 status
//!   fwup-upload --port /dev/ttyACM0 upload firmware.bin --section main --format encrypted
//!   fwup-upload --port /dev/ttyACM0 reboot
//!   fwup-upload simulate firmware.bin

mod cli;
mod commands;
mod image;
mod transport;

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let args = cli::Cli::parse();
    cli::run(args)
}
