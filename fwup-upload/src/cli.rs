// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Command-line interface definitions.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};

use fwup_common::auth::DEMO_HASH_KEY;
use fwup_common::{DataFormat, Section};

use crate::commands;
use crate::image::Target;
use crate::transport::Transport;

#[derive(Parser)]
#[command(name = "fwup-upload")]
#[command(about = "Firmware packer and upload tool for fwup-bootloader")]
pub struct Cli {
    /// Serial port (e.g., /dev/ttyACM0). Not needed for `simulate`.
    #[arg(short, long, global = true)]
    pub port: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show session phase, pending intent and firmware identities
    Status,

    /// Stage an image in scratch and commit it
    Upload(ImageArgs),

    /// Abort the current session on the device
    Reset,

    /// Drop a persisted update intent
    Clear,

    /// Reboot the device (completes a staged copy)
    Reboot,

    /// Run a full update against an in-memory flash array
    Simulate(ImageArgs),
}

#[derive(Args)]
pub struct ImageArgs {
    /// Firmware binary file
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Target section
    #[arg(short, long, value_enum, default_value = "main")]
    pub section: SectionArg,

    /// Image encoding
    #[arg(short, long, value_enum, default_value = "binary")]
    pub format: FormatArg,

    /// Shared hash key used for signing and block keys
    #[arg(short, long, default_value = DEMO_HASH_KEY)]
    pub key: String,

    /// Bytes per ProgScratch block (multiple of 8)
    #[arg(short, long, default_value = "1024")]
    pub block_size: usize,

    /// Required part number (0 = any)
    #[arg(long, default_value = "0")]
    pub part: u16,

    /// Lowest accepted part revision (0 = any)
    #[arg(long, default_value = "0")]
    pub rev_min: u8,

    /// Highest accepted part revision (0 = any)
    #[arg(long, default_value = "0")]
    pub rev_max: u8,

    /// Required serial number (0 = any)
    #[arg(long, default_value = "0")]
    pub serial: u32,
}

impl ImageArgs {
    pub fn target(&self) -> Target {
        Target {
            part_number: self.part,
            part_rev_min: self.rev_min,
            part_rev_max: self.rev_max,
            serial_number: self.serial,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum SectionArg {
    Boot,
    Main,
}

impl From<SectionArg> for Section {
    fn from(arg: SectionArg) -> Self {
        match arg {
            SectionArg::Boot => Section::Boot,
            SectionArg::Main => Section::Main,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum FormatArg {
    Binary,
    Encrypted,
}

impl From<FormatArg> for DataFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Binary => DataFormat::Binary,
            FormatArg::Encrypted => DataFormat::Encrypted,
        }
    }
}

fn open(port: Option<&str>) -> Result<Transport> {
    let port = port.context("--port is required for this command")?;
    Transport::new(port)
}

/// Execute the parsed CLI command.
pub fn run(cli: Cli) -> Result<()> {
    let port = cli.port.as_deref();

    match cli.command {
        Commands::Simulate(args) => commands::simulate(&args),
        Commands::Status => commands::status(&mut open(port)?),
        Commands::Upload(args) => commands::upload(&mut open(port)?, &args),
        Commands::Reset => commands::reset(&mut open(port)?),
        Commands::Clear => commands::clear(&mut open(port)?),
        Commands::Reboot => commands::reboot(&mut open(port)?),
    }
}
