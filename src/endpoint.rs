// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Endpoints and the buffer descriptor ownership handshake.
//!
//! Every transfer in the stack, control or bulk, goes through the same two
//! moves: while software owns a descriptor it may `drain` what the SIE left in
//! the buffer or `fill` it with something new, and then it `arm`s the
//! descriptor, which hands ownership to the SIE. The SIE hands it back when
//! the next transaction on that endpoint direction completes. There is no
//! other lock.
//!
//! None of these operations know about multi-packet transfers. Anything larger
//! than the endpoint's max packet size is clamped, and the caller is expected
//! to come back for the rest.

use log::trace;

use crate::descriptors::{EP0_MAX_PACKET, LINE_MAX_PACKET, OPCODE_MAX_PACKET};
use crate::error::{Result, UsbError};
use crate::sie::{self, stat, BufferDescriptor, Sie};
use crate::usb::UsbDir;

/// Which DATA PID the next packet on an endpoint should carry.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Sync {
    Data0,
    Data1,
    /// Whatever the descriptor did last time, flipped.
    Toggle,
}

/// Static description of one endpoint direction.
#[derive(Debug, PartialEq, Eq)]
pub struct Endpoint {
    pub number: u8,
    pub dir: UsbDir,
    pub max_packet: u16,
    /// Address of this endpoint's data buffer in USB RAM.
    pub buffer: u16,
}

// USB RAM layout. Both directions of endpoint 0 share one buffer: a SETUP
// packet is always copied out before the response is written over it.
pub static EP0_OUT: Endpoint = Endpoint {
    number: 0,
    dir: UsbDir::Out,
    max_packet: EP0_MAX_PACKET,
    buffer: 0x000,
};
pub static EP0_IN: Endpoint = Endpoint {
    number: 0,
    dir: UsbDir::In,
    max_packet: EP0_MAX_PACKET,
    buffer: 0x000,
};
pub static EP1_OUT: Endpoint = Endpoint {
    number: 1,
    dir: UsbDir::Out,
    max_packet: LINE_MAX_PACKET,
    buffer: 0x040,
};
pub static EP1_IN: Endpoint = Endpoint {
    number: 1,
    dir: UsbDir::In,
    max_packet: LINE_MAX_PACKET,
    buffer: 0x080,
};
pub static EP2_OUT: Endpoint = Endpoint {
    number: 2,
    dir: UsbDir::Out,
    max_packet: OPCODE_MAX_PACKET,
    buffer: 0x0C0,
};
pub static EP2_IN: Endpoint = Endpoint {
    number: 2,
    dir: UsbDir::In,
    max_packet: OPCODE_MAX_PACKET,
    buffer: 0x100,
};

/// Bytes of USB RAM the layout above needs.
pub const USB_RAM_SIZE: usize = 0x140;

/// The bulk endpoints, in the order they're (re)initialized on configuration.
pub static BULK_ENDPOINTS: [&Endpoint; 4] = [&EP1_OUT, &EP1_IN, &EP2_OUT, &EP2_IN];

/// Looks up a bulk endpoint by number and direction.
pub fn bulk(number: u8, dir: UsbDir) -> Option<&'static Endpoint> {
    BULK_ENDPOINTS
        .iter()
        .copied()
        .find(|ep| ep.number == number && ep.dir == dir)
}

/// Looks up any endpoint, including endpoint 0, by its USB address
/// (`0x80` bit for IN).
pub fn by_address(address: u8) -> Option<&'static Endpoint> {
    let number = address & 0x0F;
    let dir = UsbDir::of_endpoint_addr(address);
    if address & 0x70 != 0 {
        return None;
    }
    match (number, dir) {
        (0, UsbDir::Out) => Some(&EP0_OUT),
        (0, UsbDir::In) => Some(&EP0_IN),
        _ => bulk(number, dir),
    }
}

impl Endpoint {
    pub const fn slot(&self) -> usize {
        sie::slot(self.number, self.dir)
    }

    pub const fn address(&self) -> u8 {
        self.dir.endpoint(self.number)
    }

    pub fn descriptor<S: Sie>(&self, sie: &S) -> BufferDescriptor {
        sie.read_bd(self.slot())
    }

    /// Whether the SIE currently owns this endpoint's descriptor.
    pub fn is_busy<S: Sie>(&self, sie: &S) -> bool {
        self.descriptor(sie).owned_by_sie()
    }

    fn clamp(&self, len: usize) -> usize {
        let max = usize::from(self.max_packet);
        if len > max {
            trace!("EP{} {:?}: clamping {} bytes to {}", self.number, self.dir, len, max);
        }
        len.min(max)
    }

    fn owned<S: Sie>(&self, sie: &S) -> Result<BufferDescriptor> {
        let bd = self.descriptor(sie);
        if bd.owned_by_sie() {
            Err(UsbError::OwnershipConflict)
        } else {
            Ok(bd)
        }
    }

    /// Hands the descriptor to the SIE with room for (OUT) or containing (IN)
    /// `len` bytes, which is clamped to the max packet size. Returns the
    /// clamped length.
    pub fn arm<S: Sie>(&self, sie: &mut S, len: usize, sync: Sync) -> Result<usize> {
        let bd = self.owned(sie)?;
        let len = self.clamp(len);
        let data1 = match sync {
            Sync::Data0 => false,
            Sync::Data1 => true,
            Sync::Toggle => !bd.data1(),
        };
        let mut bits = stat::UOWN | stat::DTSEN;
        if data1 {
            bits |= stat::DTS;
        }
        trace!(
            "EP{} {:?}: arm {} bytes DATA{}",
            self.number,
            self.dir,
            len,
            data1 as u8
        );
        sie.write_bd(
            self.slot(),
            BufferDescriptor::new(bits, len as u16, self.buffer),
        );
        Ok(len)
    }

    /// Copies outgoing bytes into the endpoint's buffer without arming it.
    pub fn fill<S: Sie>(&self, sie: &mut S, data: &[u8]) -> Result<usize> {
        self.owned(sie)?;
        let len = self.clamp(data.len());
        sie.write_ram(self.buffer, &data[..len]);
        Ok(len)
    }

    /// Copies out whatever the SIE deposited in the buffer, up to `dst.len()`.
    /// Ownership stays with software; re-arming is up to the caller.
    pub fn drain<S: Sie>(&self, sie: &S, dst: &mut [u8]) -> Result<usize> {
        let bd = self.owned(sie)?;
        let len = self.clamp(dst.len().min(usize::from(bd.count())));
        sie.read_ram(bd.address(), &mut dst[..len]);
        Ok(len)
    }

    /// Answers the next token on this endpoint with STALL.
    ///
    /// This is the one write that ignores ownership: it's how a halt gets onto
    /// an endpoint that is sitting armed waiting for the host.
    pub fn stall<S: Sie>(&self, sie: &mut S) {
        sie.write_bd(
            self.slot(),
            BufferDescriptor::new(
                stat::UOWN | stat::BSTALL,
                self.max_packet,
                self.buffer,
            ),
        );
    }

    /// Takes the descriptor back from the SIE, dropping any stall. Only sound
    /// while the host can't be using the endpoint: right after a SETUP, while
    /// the SIE has packet processing frozen, or on EP0 IN once the host has
    /// moved on to the status stage. A descriptor software already owns is
    /// left as it is, PID and all.
    pub fn reclaim<S: Sie>(&self, sie: &mut S) {
        let bd = self.descriptor(sie);
        if bd.owned_by_sie() {
            sie.write_bd(
                self.slot(),
                BufferDescriptor::new(bd.stat & stat::DTS, bd.count(), bd.address()),
            );
        }
    }

    /// Puts the descriptor back in its power-on state: software-owned, empty,
    /// and with DTS set so that the first `Sync::Toggle` arm uses DATA0.
    pub fn reset<S: Sie>(&self, sie: &mut S) {
        sie.write_bd(self.slot(), BufferDescriptor::new(stat::DTS, 0, self.buffer));
    }
}
