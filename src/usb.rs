// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! USB structure and constant definitions.
//!
//! Everything in here is a direct image of something that travels on the wire
//! (or sits in USB RAM), so the layouts are `repr(C)` and built out of
//! `zerocopy` types that have no alignment requirements.

use byteorder::LittleEndian;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use zerocopy::{AsBytes, FromBytes, LayoutVerified, Unaligned, U16};

/// USB deals in two different transfer directions, called OUT (host-to-device)
/// and IN (device-to-host). In the vast majority of cases, OUT is represented
/// by a 0 byte, and IN by an `0x80` byte.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum UsbDir {
    Out = 0,
    In = 0x80,
}

impl UsbDir {
    pub const fn endpoint(self, num: u8) -> u8 {
        num | self as u8
    }

    pub const fn of_endpoint_addr(addr: u8) -> Self {
        if addr & Self::In as u8 != 0 {
            Self::In
        } else {
            Self::Out
        }
    }
}

/// Bits 6..5 of `bmRequestType`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum RequestKind {
    Standard = 0,
    Class = 1,
    Vendor = 2,
    Reserved = 3,
}

/// Bits 4..0 of `bmRequestType`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum Recipient {
    Device = 0,
    Interface = 1,
    Endpoint = 2,
    Other = 3,
}

/// Layout of an 8-byte USB SETUP packet.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
pub struct SetupPacket {
    /// D7: direction, D6..5: kind, D4..0: recipient.
    pub request_type: u8,
    /// Request code. Standard requests are in `StandardRequestCode`.
    pub request: u8,
    /// Request-specific argument of up to 16 bits.
    pub value: U16<LittleEndian>,
    /// Request-specific argument, usually an interface or endpoint.
    pub index: U16<LittleEndian>,
    /// Number of bytes in the data stage: exact for OUT, a maximum for IN.
    pub length: U16<LittleEndian>,
}

impl SetupPacket {
    pub const SIZE: usize = 8;

    pub fn new(request_type: u8, request: u8, value: u16, index: u16, length: u16) -> Self {
        Self {
            request_type,
            request,
            value: U16::new(value),
            index: U16::new(index),
            length: U16::new(length),
        }
    }

    /// Reinterprets the first eight bytes of `bytes` as a setup packet.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let bytes = bytes.get(..Self::SIZE)?;
        LayoutVerified::<_, SetupPacket>::new(bytes).map(|lv| *lv.into_ref())
    }

    pub fn direction(&self) -> UsbDir {
        UsbDir::of_endpoint_addr(self.request_type)
    }

    pub fn kind(&self) -> RequestKind {
        RequestKind::from_u8((self.request_type >> 5) & 0b11).unwrap_or(RequestKind::Reserved)
    }

    /// Returns `None` for the reserved recipient encodings.
    pub fn recipient(&self) -> Option<Recipient> {
        Recipient::from_u8(self.request_type & 0x1F)
    }

    pub fn value_low(&self) -> u8 {
        self.value.get() as u8
    }

    pub fn value_high(&self) -> u8 {
        (self.value.get() >> 8) as u8
    }
}

/// Standard request codes, USB 2.0 table 9-4.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum StandardRequestCode {
    GetStatus = 0x00,
    ClearFeature = 0x01,
    SetFeature = 0x03,
    SetAddress = 0x05,
    GetDescriptor = 0x06,
    SetDescriptor = 0x07,
    GetConfiguration = 0x08,
    SetConfiguration = 0x09,
    GetInterface = 0x0A,
    SetInterface = 0x0B,
    SynchFrame = 0x0C,
}

/// Feature selector for `SetFeature`/`ClearFeature` on the device.
pub const FEATURE_DEVICE_REMOTE_WAKEUP: u16 = 0x01;
/// Feature selector for `SetFeature`/`ClearFeature` on an endpoint.
pub const FEATURE_ENDPOINT_HALT: u16 = 0x00;

/// Describes a device. This is the most broad description in USB and is
/// typically the first thing the host asks for.
#[repr(C)]
#[derive(Debug, AsBytes)]
pub struct UsbDeviceDescriptor {
    /// Length of this structure, must be 18.
    pub length: u8,
    /// Type of this descriptor, must be `Device`.
    pub descriptor_type: UsbDescType,
    /// USB protocol version in binary-coded decimal.
    pub bcd_usb: U16<LittleEndian>,
    pub device_class: u8,
    pub device_subclass: u8,
    pub device_protocol: u8,
    /// Maximum packet size of endpoint 0.
    pub max_packet_size0: u8,
    pub vendor: U16<LittleEndian>,
    pub product: U16<LittleEndian>,
    /// Device version number, as BCD again.
    pub bcd_device: U16<LittleEndian>,
    /// Index of manufacturer name in string descriptor table.
    pub manufacturer_s: u8,
    /// Index of product name in string descriptor table.
    pub product_s: u8,
    /// Index of serial number in string descriptor table, 0 for none.
    pub serial_s: u8,
    pub num_configurations: u8,
}

/// Description of a single available device configuration.
#[repr(C)]
#[derive(Debug, AsBytes)]
pub struct UsbConfigurationDescriptor {
    /// Length of this structure, must be 9.
    pub length: u8,
    /// Type of this descriptor, must be `Config`.
    pub descriptor_type: UsbDescType,
    /// Total length of this descriptor plus every interface and endpoint
    /// descriptor that follows it.
    pub total_length: U16<LittleEndian>,
    pub num_interfaces: u8,
    /// Number to use when requesting this configuration via a
    /// `SetConfiguration` request.
    pub configuration_value: u8,
    pub configuration_s: u8,
    /// Bit 7 must be set; bit 6 is self-powered; bit 5 is remote wakeup.
    pub attributes: u8,
    /// Maximum device power consumption in units of 2mA.
    pub max_power: u8,
}

/// Description of an interface within a configuration.
#[repr(C)]
#[derive(Debug, AsBytes)]
pub struct UsbInterfaceDescriptor {
    /// Length of this structure, must be 9.
    pub length: u8,
    /// Type of this descriptor, must be `Interface`.
    pub descriptor_type: UsbDescType,
    pub interface_number: u8,
    pub alternate_setting: u8,
    /// Number of endpoint descriptors in this interface.
    pub num_endpoints: u8,
    pub interface_class: u8,
    pub interface_subclass: u8,
    pub interface_protocol: u8,
    pub interface_s: u8,
}

/// Describes an endpoint within an interface.
#[repr(C)]
#[derive(Debug, AsBytes)]
pub struct UsbEndpointDescriptor {
    /// Length of this struct, must be 7.
    pub length: u8,
    /// Type of this descriptor, must be `Endpoint`.
    pub descriptor_type: UsbDescType,
    /// Bottom 4 bits are the endpoint number, top bit is IN (1) or OUT (0).
    pub endpoint_address: u8,
    /// Bottom 2 bits select the transfer type from `UsbTransferType`.
    pub attributes: u8,
    pub max_packet_size: U16<LittleEndian>,
    /// Polling interval in milliseconds; ignored by hosts for bulk.
    pub interval: u8,
}

/// Types of USB descriptor.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, AsBytes)]
#[repr(u8)]
pub enum UsbDescType {
    Device = 0x01,
    Config = 0x02,
    String = 0x03,
    Interface = 0x04,
    Endpoint = 0x05,
}

/// Types of transfer that can be indicated by the `attributes` field on
/// `UsbEndpointDescriptor`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, AsBytes)]
#[repr(u8)]
pub enum UsbTransferType {
    Control = 0,
    Bulk = 2,
}
