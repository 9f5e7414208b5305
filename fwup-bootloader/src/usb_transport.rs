// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! USB CDC transport with COBS-framed postcard serialization.

use fwup_common::protocol::{Command, Response, MAX_FRAME_SIZE};
use rp2040_hal::usb::UsbBus;
use usb_device::class_prelude::UsbBusAllocator;
use usb_device::prelude::*;
use usbd_serial::SerialPort;

const RX_BUF_SIZE: usize = MAX_FRAME_SIZE;
const TX_BUF_SIZE: usize = 256;

pub struct UsbTransport {
    serial: SerialPort<'static, UsbBus>,
    usb_dev: UsbDevice<'static, UsbBus>,
    rx_buf: [u8; RX_BUF_SIZE],
    rx_pos: usize,
    /// Bytes read from the endpoint but not yet framed.
    pending: [u8; 64],
    pending_pos: usize,
    pending_len: usize,
}

impl UsbTransport {
    pub fn new(usb_bus: &'static UsbBusAllocator<UsbBus>) -> Self {
        let serial = SerialPort::new(usb_bus);
        let Ok(builder) = UsbDeviceBuilder::new(usb_bus, UsbVidPid(0x2E8A, 0x000A)).strings(&[
            StringDescriptors::default()
                .manufacturer("ADNT")
                .product("fwup bootloader")
                .serial_number("0001"),
        ]) else {
            defmt::panic!("invalid USB string descriptors");
        };
        let usb_dev = builder.device_class(usbd_serial::USB_CLASS_CDC).build();

        Self {
            serial,
            usb_dev,
            rx_buf: [0u8; RX_BUF_SIZE],
            rx_pos: 0,
            pending: [0u8; 64],
            pending_pos: 0,
            pending_len: 0,
        }
    }

    /// Poll USB device. Must be called frequently.
    pub fn poll(&mut self) -> bool {
        self.usb_dev.poll(&mut [&mut self.serial])
    }

    /// Try to receive a complete COBS-framed command.
    /// Returns `Some(Command)` when a full frame has been decoded; bytes after
    /// the frame stay buffered for the next call.
    pub fn try_receive(&mut self) -> Option<Command> {
        if self.pending_pos == self.pending_len {
            self.pending_pos = 0;
            self.pending_len = match self.serial.read(&mut self.pending) {
                Ok(count) => count,
                Err(_) => 0,
            };
        }

        while self.pending_pos < self.pending_len {
            let byte = self.pending[self.pending_pos];
            self.pending_pos += 1;

            if byte == 0x00 {
                // COBS delimiter: decode the accumulated frame
                if self.rx_pos > 0 {
                    let result =
                        postcard::from_bytes_cobs::<Command>(&mut self.rx_buf[..self.rx_pos]);
                    self.rx_pos = 0;
                    match result {
                        Ok(cmd) => return Some(cmd),
                        Err(_) => defmt::println!("Dropped undecodable frame"),
                    }
                }
            } else if self.rx_pos < RX_BUF_SIZE {
                self.rx_buf[self.rx_pos] = byte;
                self.rx_pos += 1;
            } else {
                // Overflow, drop the frame
                self.rx_pos = 0;
            }
        }
        None
    }

    /// Send a response as a COBS-framed postcard message.
    pub fn send(&mut self, resp: &Response) {
        let mut buf = [0u8; TX_BUF_SIZE];
        if let Ok(encoded) = postcard::to_slice_cobs(resp, &mut buf) {
            let mut offset = 0;
            while offset < encoded.len() {
                match self.serial.write(&encoded[offset..]) {
                    Ok(n) => offset += n,
                    Err(UsbError::WouldBlock) => {
                        self.poll();
                    }
                    Err(_) => break,
                }
            }
        }
    }
}
