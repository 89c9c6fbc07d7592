// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

mod common;

use common::*;
use usb_embosser::usb::{SetupPacket, UsbDir};

const HALT: u16 = 0;

#[test]
fn nothing_moves_until_configured() {
    let (mut dev, mut sie) = powered_up();
    assert_eq!(dev.write(&mut sie, 1, b"abc"), 0);
    let mut buf = [0; 7];
    assert_eq!(dev.read(&mut sie, 1, &mut buf), 0);
    assert_eq!(sie.host_out(2, &[1]), Handshake::Nak);
}

#[test]
fn write_then_host_reads() {
    let (mut dev, mut sie) = configured(7);
    assert_eq!(dev.write(&mut sie, 1, b"hello"), 5);
    let armed = sie.bd(1, UsbDir::In);
    assert!(armed.owned_by_sie());

    // Busy until the host takes it; nothing about the descriptor changes.
    assert_eq!(dev.write(&mut sie, 1, b"again"), 0);
    assert_eq!(sie.bd(1, UsbDir::In), armed);

    let p = sie.host_in(1).unwrap();
    assert_eq!(p.data, b"hello");
    assert!(!p.data1);
    pump(&mut dev, &mut sie);

    assert_eq!(dev.write(&mut sie, 1, b"world"), 5);
    let p = sie.host_in(1).unwrap();
    assert_eq!(p.data, b"world");
    assert!(p.data1);
    pump(&mut dev, &mut sie);
    assert_eq!(sie.host_in(1), Err(Handshake::Nak));
}

#[test]
fn writes_are_clamped_to_one_packet() {
    let (mut dev, mut sie) = configured(7);
    assert_eq!(dev.write(&mut sie, 1, b"0123456789"), 7);
    assert_eq!(sie.host_in(1).unwrap().data, b"0123456");
    pump(&mut dev, &mut sie);

    assert_eq!(dev.write(&mut sie, 2, &[0xAA, 0xBB]), 1);
    assert_eq!(sie.host_in(2).unwrap().data, vec![0xAA]);
}

#[test]
fn unknown_endpoints_move_nothing() {
    let (mut dev, mut sie) = configured(7);
    assert_eq!(dev.write(&mut sie, 0, b"x"), 0);
    assert_eq!(dev.write(&mut sie, 3, b"x"), 0);
    let mut buf = [0; 4];
    assert_eq!(dev.read(&mut sie, 5, &mut buf), 0);
}

#[test]
fn read_takes_one_packet_and_rearms() {
    let (mut dev, mut sie) = configured(7);
    let mut buf = [0; 7];
    assert_eq!(dev.read(&mut sie, 2, &mut buf), 0);

    assert_eq!(sie.host_out(2, &[6]), Handshake::Ack);
    // The endpoint is ours now; the host has to wait.
    assert_eq!(sie.host_out(2, &[7]), Handshake::Nak);
    pump(&mut dev, &mut sie);

    assert_eq!(dev.read(&mut sie, 2, &mut buf), 1);
    assert_eq!(buf[0], 6);
    let bd = sie.bd(2, UsbDir::Out);
    assert!(bd.owned_by_sie());
    assert!(bd.data1());
    assert_eq!(bd.count(), 1);

    assert_eq!(dev.read(&mut sie, 2, &mut buf), 0);
    assert_eq!(sie.host_out(2, &[7]), Handshake::Ack);
    pump(&mut dev, &mut sie);
    assert_eq!(dev.read(&mut sie, 2, &mut buf), 1);
    assert_eq!(buf[0], 7);
}

#[test]
fn short_buffer_drops_the_rest() {
    let (mut dev, mut sie) = configured(7);
    assert_eq!(sie.host_out(1, &[1, 2, 3, 4, 5, 6, 7]), Handshake::Ack);
    pump(&mut dev, &mut sie);
    let mut buf = [0; 3];
    assert_eq!(dev.read(&mut sie, 1, &mut buf), 3);
    assert_eq!(buf, [1, 2, 3]);
    assert_eq!(dev.read(&mut sie, 1, &mut buf), 0);
}

#[test]
fn endpoint_halt() {
    let (mut dev, mut sie) = configured(7);
    let status = SetupPacket::new(0x82, GET_STATUS, 0, 0x81, 2);
    assert_eq!(control_in(&mut dev, &mut sie, status), Some(vec![0, 0]));

    assert!(control_out(&mut dev, &mut sie, SetupPacket::new(0x02, SET_FEATURE, HALT, 0x81, 0)));
    assert_eq!(control_in(&mut dev, &mut sie, status), Some(vec![1, 0]));
    assert!(dev.state().is_halted(&usb_embosser::endpoint::EP1_IN));
    assert_eq!(sie.host_in(1), Err(Handshake::Stall));
    pump(&mut dev, &mut sie);
    assert_eq!(dev.write(&mut sie, 1, b"no"), 0);

    // Stalling a bulk endpoint doesn't upset endpoint 0.
    assert!(control_out(&mut dev, &mut sie, SetupPacket::new(0x02, CLEAR_FEATURE, HALT, 0x81, 0)));
    assert_eq!(control_in(&mut dev, &mut sie, status), Some(vec![0, 0]));
    assert_eq!(sie.host_in(1), Err(Handshake::Nak));
    assert_eq!(dev.write(&mut sie, 1, b"yes"), 3);
    let p = sie.host_in(1).unwrap();
    assert_eq!(p.data, b"yes");
    assert!(!p.data1);
}

#[test]
fn halted_out_endpoint_restarts_at_data0() {
    let (mut dev, mut sie) = configured(7);
    assert!(control_out(&mut dev, &mut sie, SetupPacket::new(0x02, SET_FEATURE, HALT, 0x02, 0)));
    assert_eq!(sie.host_out(2, &[1]), Handshake::Stall);
    pump(&mut dev, &mut sie);

    assert!(control_out(&mut dev, &mut sie, SetupPacket::new(0x02, CLEAR_FEATURE, HALT, 0x02, 0)));
    let bd = sie.bd(2, UsbDir::Out);
    assert!(bd.owned_by_sie());
    assert!(!bd.stalled());
    assert!(!bd.data1());
    assert_eq!(sie.host_out(2, &[1]), Handshake::Ack);
}

#[test]
fn endpoint_zero_cannot_be_halted() {
    let (mut dev, mut sie) = configured(7);
    assert!(!control_out(&mut dev, &mut sie, SetupPacket::new(0x02, SET_FEATURE, HALT, 0x00, 0)));
    // But it recovers for the next request.
    assert_eq!(
        control_in(&mut dev, &mut sie, SetupPacket::new(0x80, GET_CONFIGURATION, 0, 0, 1)),
        Some(vec![1])
    );
}

#[test]
fn suspend_blocks_bulk() {
    let (mut dev, mut sie) = configured(7);
    sie.idle();
    pump(&mut dev, &mut sie);
    assert!(dev.state().suspended);
    assert!(sie.suspended);
    assert_eq!(dev.write(&mut sie, 1, b"zz"), 0);

    sie.activity();
    pump(&mut dev, &mut sie);
    assert!(!dev.state().suspended);
    assert!(!sie.suspended);
    assert!(dev.is_configured());
    assert_eq!(dev.write(&mut sie, 1, b"zz"), 2);
}

#[test]
fn bus_errors_and_frames_are_just_cleared() {
    let (mut dev, mut sie) = configured(7);
    let before = *dev.state();
    sie.error();
    sie.sof();
    pump(&mut dev, &mut sie);
    assert_eq!(*dev.state(), before);
    assert_eq!(dev.write(&mut sie, 2, &[1]), 1);
}

#[test]
fn empty_read_leaves_the_packet() {
    let (mut dev, mut sie) = configured(7);
    assert_eq!(sie.host_out(1, &[1, 2, 3]), Handshake::Ack);
    pump(&mut dev, &mut sie);

    assert_eq!(dev.read(&mut sie, 1, &mut []), 0);
    assert!(!sie.bd(1, UsbDir::Out).owned_by_sie());

    let mut buf = [0; 7];
    assert_eq!(dev.read(&mut sie, 1, &mut buf), 3);
    assert_eq!(&buf[..3], &[1, 2, 3]);
}
