// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The compiled-in descriptor tables for the embosser.
//!
//! These are what the host reads during enumeration. They never change at
//! runtime; the dispatcher hands out `&'static` slices into them.

use byteorder::LittleEndian;
use zerocopy::{AsBytes, U16};

use crate::usb::{
    UsbConfigurationDescriptor, UsbDescType, UsbDeviceDescriptor, UsbDir, UsbEndpointDescriptor,
    UsbInterfaceDescriptor, UsbTransferType,
};

/// Max packet size of the control endpoint.
pub const EP0_MAX_PACKET: u16 = 64;
/// Max packet size of EP1, which carries one print line per packet.
pub const LINE_MAX_PACKET: u16 = 7;
/// Max packet size of EP2, which carries one opcode or status byte.
pub const OPCODE_MAX_PACKET: u16 = 1;

pub const LINE_ENDPOINT: u8 = 1;
pub const OPCODE_ENDPOINT: u8 = 2;

/// The only configuration value we advertise.
pub const CONFIGURATION_VALUE: u8 = 1;

/// Configuration descriptor with its interface and endpoint descriptors, laid
/// out back to back the way `GetDescriptor(Config)` returns them.
#[repr(C)]
#[derive(Debug, AsBytes)]
pub struct ConfigurationTree {
    pub config: UsbConfigurationDescriptor,
    pub interface: UsbInterfaceDescriptor,
    pub endpoints: [UsbEndpointDescriptor; 4],
}

const fn le16(x: u16) -> U16<LittleEndian> {
    U16::from_bytes(u16::to_le_bytes(x))
}

const fn bulk_endpoint(address: u8, max_packet: u16) -> UsbEndpointDescriptor {
    UsbEndpointDescriptor {
        length: core::mem::size_of::<UsbEndpointDescriptor>() as u8,
        descriptor_type: UsbDescType::Endpoint,
        endpoint_address: address,
        attributes: UsbTransferType::Bulk as u8,
        max_packet_size: le16(max_packet),
        interval: 1,
    }
}

/// Builds a string descriptor from ASCII text, widening each byte to UTF-16LE.
/// `N` must be the full descriptor length, i.e. `2 + 2 * text.len()`.
const fn ascii_string<const N: usize>(text: &[u8]) -> [u8; N] {
    assert!(N == 2 + 2 * text.len());
    assert!(N <= 255);
    let mut out = [0; N];
    out[0] = N as u8;
    out[1] = UsbDescType::String as u8;
    let mut i = 0;
    while i < text.len() {
        out[2 + 2 * i] = text[i];
        i += 1;
    }
    out
}

pub static DEVICE_DESCRIPTOR: UsbDeviceDescriptor = UsbDeviceDescriptor {
    length: core::mem::size_of::<UsbDeviceDescriptor>() as u8,
    descriptor_type: UsbDescType::Device,
    bcd_usb: le16(0x0200),
    device_class: 0,
    device_subclass: 0,
    device_protocol: 0,
    max_packet_size0: EP0_MAX_PACKET as u8,
    vendor: le16(0x04D8),
    product: le16(0x7531),
    bcd_device: le16(0x0001),
    manufacturer_s: 1,
    product_s: 2,
    serial_s: 0,
    num_configurations: 1,
};

pub static CONFIGURATION: ConfigurationTree = ConfigurationTree {
    config: UsbConfigurationDescriptor {
        length: core::mem::size_of::<UsbConfigurationDescriptor>() as u8,
        descriptor_type: UsbDescType::Config,
        total_length: le16(core::mem::size_of::<ConfigurationTree>() as u16),
        num_interfaces: 1,
        configuration_value: CONFIGURATION_VALUE,
        configuration_s: 0,
        // Bus powered, remote wakeup capable.
        attributes: 0xA0,
        // 100 mA
        max_power: 0x32,
    },
    interface: UsbInterfaceDescriptor {
        length: core::mem::size_of::<UsbInterfaceDescriptor>() as u8,
        descriptor_type: UsbDescType::Interface,
        interface_number: 0,
        alternate_setting: 0,
        num_endpoints: 4,
        // Printer class, printer subclass.
        interface_class: 0x07,
        interface_subclass: 0x01,
        interface_protocol: 0,
        interface_s: 0,
    },
    endpoints: [
        bulk_endpoint(UsbDir::In.endpoint(LINE_ENDPOINT), LINE_MAX_PACKET),
        bulk_endpoint(UsbDir::Out.endpoint(LINE_ENDPOINT), LINE_MAX_PACKET),
        bulk_endpoint(UsbDir::In.endpoint(OPCODE_ENDPOINT), OPCODE_MAX_PACKET),
        bulk_endpoint(UsbDir::Out.endpoint(OPCODE_ENDPOINT), OPCODE_MAX_PACKET),
    ],
};

/// String index 0: the supported language IDs, here just English (US).
pub static LANGUAGE_DESCRIPTOR: [u8; 4] = [4, UsbDescType::String as u8, 0x09, 0x04];

pub static MANUFACTURER_STRING: [u8; 26] = ascii_string(b"Embosser    ");

pub static PRODUCT_STRING: [u8; 32] = ascii_string(b"USB Braille 0.1");

static STRINGS: [&[u8]; 3] = [&LANGUAGE_DESCRIPTOR, &MANUFACTURER_STRING, &PRODUCT_STRING];

/// Finds the table for a `GetDescriptor` request, trimmed to the length the
/// table itself declares. Returns `None` for anything we don't carry.
pub fn lookup(kind: UsbDescType, index: u8) -> Option<&'static [u8]> {
    match kind {
        UsbDescType::Device if index == 0 => {
            let bytes = DEVICE_DESCRIPTOR.as_bytes();
            bytes.get(..usize::from(DEVICE_DESCRIPTOR.length))
        }
        UsbDescType::Config if index == 0 => {
            let bytes = CONFIGURATION.as_bytes();
            bytes.get(..usize::from(CONFIGURATION.config.total_length.get()))
        }
        UsbDescType::String => {
            let bytes = *STRINGS.get(usize::from(index))?;
            bytes.get(..usize::from(*bytes.first()?))
        }
        _ => None,
    }
}
