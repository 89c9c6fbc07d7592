// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The Serial Interface Engine, as seen from software.
//!
//! The SIE is the hardware block that actually speaks USB on the wire. It
//! runs asynchronously to us: between two calls into the stack it may
//! complete a transaction, hand a buffer descriptor back to software, or
//! raise interrupt flags. The only thing that keeps us from racing it is the
//! `UOWN` bit in each buffer descriptor.
//!
//! The stack never touches registers directly. Instead it goes through the
//! `Sie` trait, which models a buffer descriptor table (one 4-byte
//! descriptor per endpoint direction), a window of USB RAM that the
//! descriptors point into, and the interrupt/status/address registers. A real
//! chip implements it over memory-mapped I/O; tests implement it with a
//! simulated SIE.

use bitflags::bitflags;
use byteorder::LittleEndian;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use zerocopy::{AsBytes, FromBytes, Unaligned, U16};

use crate::usb::UsbDir;

/// One entry of the buffer descriptor table, exactly as the SIE stores it.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
pub struct BufferDescriptor {
    /// Status bits; see the `stat` constants.
    pub stat: u8,
    /// Low 8 bits of the byte count. Bits 9:8 live in `stat`.
    pub cnt: u8,
    /// Address of the data buffer within USB RAM.
    pub adr: U16<LittleEndian>,
}

/// Bits of `BufferDescriptor::stat`.
pub mod stat {
    /// The SIE owns the descriptor. Software must not touch anything else in
    /// it while this is set.
    pub const UOWN: u8 = 0x80;
    /// Data toggle: set for DATA1, clear for DATA0.
    pub const DTS: u8 = 0x40;
    /// Ask the SIE to drop packets whose toggle doesn't match `DTS`.
    pub const DTSEN: u8 = 0x08;
    /// Answer the next token on this endpoint with STALL.
    pub const BSTALL: u8 = 0x04;
    /// Bits 9:8 of the byte count.
    pub const BC98: u8 = 0x03;
    /// When software owns the descriptor, bits 5:2 hold the PID of the token
    /// that completed.
    pub const PID_MASK: u8 = 0x3C;
    pub const PID_SHIFT: u8 = 2;
}

/// Token PIDs that the SIE reports back in a completed descriptor.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum Pid {
    Out = 0x1,
    In = 0x9,
    Setup = 0xD,
}

impl BufferDescriptor {
    pub fn new(stat: u8, count: u16, adr: u16) -> Self {
        Self {
            stat: (stat & !stat::BC98) | ((count >> 8) as u8 & stat::BC98),
            cnt: count as u8,
            adr: U16::new(adr),
        }
    }

    pub fn owned_by_sie(&self) -> bool {
        self.stat & stat::UOWN != 0
    }

    pub fn data1(&self) -> bool {
        self.stat & stat::DTS != 0
    }

    pub fn stalled(&self) -> bool {
        self.stat & stat::BSTALL != 0
    }

    /// Full 10-bit byte count.
    pub fn count(&self) -> u16 {
        (u16::from(self.stat & stat::BC98) << 8) | u16::from(self.cnt)
    }

    pub fn address(&self) -> u16 {
        self.adr.get()
    }

    /// PID of the completed token. Only meaningful when software owns the
    /// descriptor, because the SIE reuses those bits for control flags.
    pub fn pid(&self) -> Option<Pid> {
        if self.owned_by_sie() {
            return None;
        }
        Pid::from_u8((self.stat & stat::PID_MASK) >> stat::PID_SHIFT)
    }
}

bitflags! {
    /// Interrupt flag bits. Positions match the usual USB interrupt status
    /// register layout: reset, error, activity, transaction, idle, stall, SOF.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct Interrupts: u8 {
        /// Bus reset (SE0 for more than 2.5 us).
        const RESET = 1 << 0;
        /// CRC, bit stuffing, timeout or data sequence error.
        const ERROR = 1 << 1;
        /// Bus activity while suspended.
        const ACTIVITY = 1 << 2;
        /// A transaction completed and its entry is at the head of the FIFO.
        const TRANSACTION = 1 << 3;
        /// Bus idle for more than 3 ms.
        const IDLE = 1 << 4;
        /// A STALL handshake was sent.
        const STALL = 1 << 5;
        const SOF = 1 << 6;
    }
}

/// Which endpoint direction the last completed transaction used.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub endpoint: u8,
    pub dir: UsbDir,
}

impl Transaction {
    /// Index of the matching entry in the buffer descriptor table.
    pub fn slot(&self) -> usize {
        slot(self.endpoint, self.dir)
    }
}

/// Buffer descriptor table index: OUT then IN for each endpoint.
pub const fn slot(endpoint: u8, dir: UsbDir) -> usize {
    endpoint as usize * 2
        + match dir {
            UsbDir::Out => 0,
            UsbDir::In => 1,
        }
}

/// How an endpoint's control register is set up.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EndpointMode {
    Disabled,
    /// Bidirectional, with SETUP tokens allowed.
    Control,
    /// Bidirectional, SETUP tokens refused.
    Bulk,
}

/// Hardware access needed by the device stack.
pub trait Sie {
    /// Whether the USB module has been switched on.
    fn is_enabled(&self) -> bool;
    /// Switches on the USB module with all interrupt sources masked.
    fn enable(&mut self);
    /// Whether the bus is currently in single-ended-zero, which means we're
    /// not connected to anything that is driving it.
    fn single_ended_zero(&self) -> bool;

    /// Interrupt flags that are currently raised.
    fn pending(&self) -> Interrupts;
    fn enabled_interrupts(&self) -> Interrupts;
    fn set_enabled_interrupts(&mut self, ints: Interrupts);
    /// Clears the given flags. Clearing `TRANSACTION` also advances the
    /// transaction status FIFO.
    fn clear(&mut self, ints: Interrupts);
    /// The transaction that raised `TRANSACTION`, if any.
    fn transaction(&self) -> Option<Transaction>;

    fn address(&self) -> u8;
    fn set_address(&mut self, address: u8);
    fn set_suspended(&mut self, suspended: bool);
    /// The SIE freezes token processing when a SETUP arrives so that software
    /// can reclaim endpoint 0. This lets it go again.
    fn resume_packet_processing(&mut self);
    fn configure_endpoint(&mut self, endpoint: u8, mode: EndpointMode);
    /// Whether endpoint 0 has answered a token with STALL. Hardware that
    /// latches this as an event clears it on read; hardware that keeps the
    /// stall armed until the next SETUP may go on reporting it, which the
    /// stack tolerates.
    fn take_control_stall(&mut self) -> bool;

    fn read_bd(&self, slot: usize) -> BufferDescriptor;
    fn write_bd(&mut self, slot: usize, bd: BufferDescriptor);
    fn read_ram(&self, address: u16, dst: &mut [u8]);
    fn write_ram(&mut self, address: u16, src: &[u8]);
}
