// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared helpers for the integration tests: a simulated SIE and a few
//! host-side request sequences built on it.

#![allow(dead_code)]

pub mod sim;

use usb_embosser::sie::Sie;
use usb_embosser::usb::SetupPacket;
use usb_embosser::UsbDevice;

pub use sim::{Handshake, Packet, SimSie};

pub const GET_STATUS: u8 = 0x00;
pub const CLEAR_FEATURE: u8 = 0x01;
pub const SET_FEATURE: u8 = 0x03;
pub const SET_ADDRESS: u8 = 0x05;
pub const GET_DESCRIPTOR: u8 = 0x06;
pub const GET_CONFIGURATION: u8 = 0x08;
pub const SET_CONFIGURATION: u8 = 0x09;

/// Polls the device until the SIE has nothing left for it.
pub fn pump(dev: &mut UsbDevice, sie: &mut SimSie) {
    for _ in 0..16 {
        if sie.pending().intersection(sie.enabled_interrupts()).is_empty() {
            return;
        }
        dev.poll(sie);
    }
    panic!("device never drained its interrupt flags");
}

/// A device that has been plugged in and seen its first bus reset.
pub fn powered_up() -> (UsbDevice, SimSie) {
    let mut dev = UsbDevice::new();
    let mut sie = SimSie::new();
    dev.attach(&mut sie);
    sie.bus_reset();
    pump(&mut dev, &mut sie);
    (dev, sie)
}

/// A device that has been addressed and configured.
pub fn configured(address: u8) -> (UsbDevice, SimSie) {
    let (mut dev, mut sie) = powered_up();
    assert!(control_out(&mut dev, &mut sie, SetupPacket::new(0x00, SET_ADDRESS, address.into(), 0, 0)));
    assert!(control_out(&mut dev, &mut sie, SetupPacket::new(0x00, SET_CONFIGURATION, 1, 0, 0)));
    (dev, sie)
}

/// Runs a device-to-host control transfer the way a host would: SETUP,
/// IN packets until a short one or `wLength` bytes, then a zero-length OUT
/// status. Returns the packets, or the handshake that ended it early.
pub fn control_in_packets(
    dev: &mut UsbDevice,
    sie: &mut SimSie,
    setup: SetupPacket,
) -> Result<Vec<Packet>, Handshake> {
    assert!(sie.host_setup(setup), "device refused SETUP");
    pump(dev, sie);

    let wanted = usize::from(setup.length.get());
    let mut packets: Vec<Packet> = Vec::new();
    loop {
        let packet = sie.host_in(0);
        pump(dev, sie);
        let packet = packet?;
        let short = packet.data.len() < 64;
        packets.push(packet);
        let total: usize = packets.iter().map(|p| p.data.len()).sum();
        if short || total >= wanted {
            break;
        }
    }

    assert_eq!(sie.host_out(0, &[]), Handshake::Ack);
    pump(dev, sie);
    Ok(packets)
}

/// Like `control_in_packets`, with the packets glued together.
pub fn control_in(dev: &mut UsbDevice, sie: &mut SimSie, setup: SetupPacket) -> Option<Vec<u8>> {
    control_in_packets(dev, sie, setup)
        .ok()
        .map(|packets| packets.into_iter().flat_map(|p| p.data).collect())
}

/// Runs a control transfer with no data stage. Returns whether the device
/// acknowledged the status stage.
pub fn control_out(dev: &mut UsbDevice, sie: &mut SimSie, setup: SetupPacket) -> bool {
    assert!(sie.host_setup(setup), "device refused SETUP");
    pump(dev, sie);
    let status = sie.host_in(0);
    pump(dev, sie);
    match status {
        Ok(packet) => {
            assert!(packet.data.is_empty());
            assert!(packet.data1, "status stage must be DATA1");
            true
        }
        Err(_) => false,
    }
}
