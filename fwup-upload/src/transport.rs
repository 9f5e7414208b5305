// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Serial transport layer for bootloader communication.
//!
//! Every frame is a postcard message followed by COBS encoding, delimited by
//! 0x00. Commands never exceed [`MAX_FRAME_SIZE`], the device's receive buffer.

use anyhow::{bail, Context, Result};
use serialport::SerialPort;
use std::io::{Read, Write};
use std::time::Duration;

use fwup_common::protocol::{Command, Response, MAX_FRAME_SIZE};

/// Default timeout for serial operations in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Worst-case erase time of one 4 KiB sector on the QSPI part.
const SECTOR_ERASE_MS: u64 = 400;
const SECTOR_SIZE: u64 = 4096;

/// Timeout for a command that erases `bytes` of flash before replying.
pub fn erase_timeout_ms(bytes: u32) -> u64 {
    DEFAULT_TIMEOUT_MS + (bytes as u64).div_ceil(SECTOR_SIZE) * SECTOR_ERASE_MS
}

/// USB CDC transport for communicating with the bootloader.
pub struct Transport {
    port: Box<dyn SerialPort>,
    rx_buf: Vec<u8>,
}

impl Transport {
    /// Open `port_name` with the default timeout.
    pub fn new(port_name: &str) -> Result<Self> {
        Self::with_timeout(port_name, DEFAULT_TIMEOUT_MS)
    }

    /// Open `port_name` with a custom timeout.
    pub fn with_timeout(port_name: &str, timeout_ms: u64) -> Result<Self> {
        let port = serialport::new(port_name, 115200)
            .timeout(Duration::from_millis(timeout_ms))
            .open()
            .with_context(|| format!("Failed to open serial port {}", port_name))?;

        Ok(Self {
            port,
            rx_buf: Vec::with_capacity(256),
        })
    }

    /// Get the port name.
    pub fn port_name(&self) -> String {
        self.port.name().unwrap_or_else(|| "?".to_string())
    }

    /// Send a command to the bootloader.
    ///
    /// Fails without touching the port if the frame would overflow the
    /// device's receive buffer.
    pub fn send(&mut self, cmd: &Command) -> Result<()> {
        let mut buf = [0u8; MAX_FRAME_SIZE];
        let encoded = match postcard::to_slice_cobs(cmd, &mut buf) {
            Ok(encoded) => encoded,
            Err(postcard::Error::SerializeBufferFull) => {
                bail!("Command does not fit in a {} byte frame", MAX_FRAME_SIZE)
            }
            Err(e) => bail!("Failed to serialize command: {}", e),
        };
        self.port
            .write_all(encoded)
            .context("Failed to write to serial port")?;
        self.port.flush()?;
        Ok(())
    }

    /// Read one COBS frame and decode it.
    pub fn receive(&mut self) -> Result<Response> {
        self.rx_buf.clear();
        let mut byte = [0u8; 1];

        loop {
            match self.port.read(&mut byte) {
                Ok(1) => {
                    self.rx_buf.push(byte[0]);
                    if byte[0] == 0 {
                        break;
                    }
                }
                Ok(_) => continue,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                    bail!("Timeout waiting for response");
                }
                Err(e) => bail!("Serial read error: {}", e),
            }
        }

        postcard::from_bytes_cobs(&mut self.rx_buf).map_err(|e| {
            anyhow::anyhow!(
                "Failed to deserialize response: {} (raw {} bytes: {:02x?})",
                e,
                self.rx_buf.len(),
                &self.rx_buf[..self.rx_buf.len().min(32)]
            )
        })
    }

    /// Discard stale bytes left over from an earlier exchange.
    fn drain_rx(&mut self) {
        let mut buf = [0u8; 64];
        let old_timeout = self.port.timeout();
        let _ = self.port.set_timeout(Duration::from_millis(10));
        while self.port.read(&mut buf).unwrap_or(0) > 0 {}
        let _ = self.port.set_timeout(old_timeout);
    }

    /// Send a command and wait for the response.
    pub fn send_recv(&mut self, cmd: &Command) -> Result<Response> {
        self.drain_rx();
        self.send(cmd)?;
        self.receive()
    }

    /// Send a command and wait for the response with a custom timeout, for
    /// commands that erase flash before replying (see [`erase_timeout_ms`]).
    pub fn send_recv_timeout(&mut self, cmd: &Command, timeout_ms: u64) -> Result<Response> {
        let old_timeout = self.port.timeout();
        self.port
            .set_timeout(Duration::from_millis(timeout_ms))
            .context("Failed to set timeout")?;

        let result = self.send_recv(cmd);

        let _ = self.port.set_timeout(old_timeout);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_erase_timeout_scales_with_sectors() {
        assert_eq!(erase_timeout_ms(0), DEFAULT_TIMEOUT_MS);
        assert_eq!(erase_timeout_ms(1), DEFAULT_TIMEOUT_MS + SECTOR_ERASE_MS);
        assert_eq!(erase_timeout_ms(0xC_0000), DEFAULT_TIMEOUT_MS + 192 * SECTOR_ERASE_MS);
    }
}
