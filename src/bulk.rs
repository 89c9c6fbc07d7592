// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Non-blocking bulk I/O on endpoints 1 and 2.
//!
//! Both calls return the number of bytes moved, and 0 means "not now": the
//! device isn't configured, the endpoint is halted, or the SIE still owns the
//! descriptor. Callers retry on a later pass through their main loop.

use log::{debug, trace};

use crate::endpoint::{self, Endpoint, Sync, BULK_ENDPOINTS};
use crate::error::UsbError;
use crate::sie::{EndpointMode, Sie};
use crate::state::UsbState;
use crate::usb::UsbDir;

/// Queues up to one max packet of `bytes` on IN endpoint `number`.
pub fn write<S: Sie>(sie: &mut S, state: &UsbState, number: u8, bytes: &[u8]) -> usize {
    if !state.bulk_ready() {
        return 0;
    }
    let ep = match endpoint::bulk(number, UsbDir::In) {
        Some(ep) => ep,
        None => return 0,
    };
    if state.is_halted(ep) {
        return 0;
    }
    if bytes.len() > usize::from(ep.max_packet) {
        trace!("EP{} IN: {}", number, UsbError::OversizeTransfer);
    }
    ep.fill(sie, bytes)
        .and_then(|len| ep.arm(sie, len, Sync::Toggle))
        .unwrap_or(0)
}

/// Takes whatever the host last sent to OUT endpoint `number`, up to
/// `buf.len()` bytes, and re-arms the endpoint for the next packet. Anything
/// that doesn't fit in `buf` is lost, except that an empty `buf` takes
/// nothing and leaves the packet where it is.
pub fn read<S: Sie>(sie: &mut S, state: &UsbState, number: u8, buf: &mut [u8]) -> usize {
    if !state.bulk_ready() {
        return 0;
    }
    let ep = match endpoint::bulk(number, UsbDir::Out) {
        Some(ep) => ep,
        None => return 0,
    };
    // Nowhere to put it; leave the packet for a later read.
    if buf.is_empty() {
        return 0;
    }
    let len = match ep.drain(sie, buf) {
        Ok(len) => len,
        Err(_) => return 0,
    };
    match ep.arm(sie, usize::from(ep.max_packet), Sync::Toggle) {
        Ok(_) => len,
        Err(_) => 0,
    }
}

/// Enables the bulk endpoints and gets the OUT sides ready to receive, all
/// starting at DATA0.
pub fn configure<S: Sie>(sie: &mut S) {
    for number in [1, 2] {
        sie.configure_endpoint(number, EndpointMode::Bulk);
    }
    for ep in BULK_ENDPOINTS {
        restart(sie, ep);
    }
    debug!("bulk endpoints up");
}

pub fn deconfigure<S: Sie>(sie: &mut S) {
    for number in [1, 2] {
        sie.configure_endpoint(number, EndpointMode::Disabled);
    }
    for ep in BULK_ENDPOINTS {
        ep.reset(sie);
    }
    debug!("bulk endpoints down");
}

/// Puts one endpoint back in its initial state, as after configuration or a
/// cleared halt.
pub fn restart<S: Sie>(sie: &mut S, ep: &Endpoint) {
    ep.reset(sie);
    if ep.dir == UsbDir::Out {
        // Can't fail: reset just gave the descriptor to software.
        let _ = ep.arm(sie, usize::from(ep.max_packet), Sync::Toggle);
    }
}
