// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A simulated SIE with a host attached to it.
//!
//! The device side sees the `Sie` trait. Tests play the host through the
//! `host_*` methods, which behave the way the hardware does when a token
//! arrives: they only touch descriptors the SIE owns, hand them back with
//! the PID and byte count filled in, and queue a transaction.

use std::collections::VecDeque;

use usb_embosser::sie::{
    slot, stat, BufferDescriptor, EndpointMode, Interrupts, Pid, Sie, Transaction,
};
use usb_embosser::usb::{SetupPacket, UsbDir};
use zerocopy::AsBytes;

/// How the device answered a token.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Handshake {
    Ack,
    Nak,
    Stall,
}

/// A data packet the device sent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    pub data: Vec<u8>,
    pub data1: bool,
}

pub struct SimSie {
    pub enabled: bool,
    /// Bus in single-ended zero, as when nothing is driving it.
    pub se0: bool,
    pub suspended: bool,
    /// Packet processing is frozen after every SETUP until software lets
    /// it go.
    pub frozen: bool,
    pub modes: [EndpointMode; 3],
    pending: Interrupts,
    enabled_ints: Interrupts,
    fifo: VecDeque<Transaction>,
    address: u8,
    control_stall: bool,
    bdt: [BufferDescriptor; 6],
    ram: [u8; 512],
}

impl SimSie {
    pub fn new() -> Self {
        Self {
            enabled: false,
            se0: false,
            suspended: false,
            frozen: false,
            modes: [EndpointMode::Disabled; 3],
            pending: Interrupts::empty(),
            enabled_ints: Interrupts::empty(),
            fifo: VecDeque::new(),
            address: 0,
            control_stall: false,
            bdt: [BufferDescriptor::default(); 6],
            ram: [0; 512],
        }
    }

    pub fn bd(&self, endpoint: u8, dir: UsbDir) -> BufferDescriptor {
        self.bdt[slot(endpoint, dir)]
    }

    /// Number of transactions not yet acknowledged by software.
    pub fn queued(&self) -> usize {
        self.fifo.len()
    }

    fn complete(&mut self, endpoint: u8, dir: UsbDir, pid: Pid, count: u16) {
        let i = slot(endpoint, dir);
        let old = self.bdt[i];
        self.bdt[i] = BufferDescriptor::new(
            (old.stat & stat::DTS) | ((pid as u8) << stat::PID_SHIFT),
            count,
            old.address(),
        );
        self.fifo.push_back(Transaction { endpoint, dir });
    }

    fn stalled(&mut self, endpoint: u8) -> Handshake {
        self.pending.insert(Interrupts::STALL);
        if endpoint == 0 {
            self.control_stall = true;
        }
        Handshake::Stall
    }

    fn usable(&self, endpoint: u8) -> bool {
        self.enabled
            && !self.suspended
            && self
                .modes
                .get(usize::from(endpoint))
                .map_or(false, |m| *m != EndpointMode::Disabled)
    }

    /// The host sends a SETUP to endpoint 0. Returns false if the device
    /// wasn't ready to take it.
    pub fn host_setup(&mut self, setup: SetupPacket) -> bool {
        if !self.usable(0) || self.modes[0] != EndpointMode::Control {
            return false;
        }
        let bd = self.bd(0, UsbDir::Out);
        if !bd.owned_by_sie() {
            return false;
        }
        self.write_ram(bd.address(), setup.as_bytes());
        self.complete(0, UsbDir::Out, Pid::Setup, SetupPacket::SIZE as u16);
        self.frozen = true;
        true
    }

    /// The host sends a DATA packet to an OUT endpoint.
    pub fn host_out(&mut self, endpoint: u8, data: &[u8]) -> Handshake {
        if !self.usable(endpoint) || self.frozen {
            return Handshake::Nak;
        }
        let bd = self.bd(endpoint, UsbDir::Out);
        if !bd.owned_by_sie() {
            return Handshake::Nak;
        }
        if bd.stalled() {
            return self.stalled(endpoint);
        }
        let len = data.len().min(usize::from(bd.count()));
        self.write_ram(bd.address(), &data[..len]);
        self.complete(endpoint, UsbDir::Out, Pid::Out, len as u16);
        Handshake::Ack
    }

    /// The host asks an IN endpoint for a packet.
    pub fn host_in(&mut self, endpoint: u8) -> Result<Packet, Handshake> {
        if !self.usable(endpoint) || self.frozen {
            return Err(Handshake::Nak);
        }
        let bd = self.bd(endpoint, UsbDir::In);
        if !bd.owned_by_sie() {
            return Err(Handshake::Nak);
        }
        if bd.stalled() {
            return Err(self.stalled(endpoint));
        }
        let mut data = vec![0; usize::from(bd.count())];
        self.read_ram(bd.address(), &mut data);
        self.complete(endpoint, UsbDir::In, Pid::In, bd.count());
        Ok(Packet { data, data1: bd.data1() })
    }

    pub fn bus_reset(&mut self) {
        self.pending.insert(Interrupts::RESET);
    }

    pub fn idle(&mut self) {
        self.pending.insert(Interrupts::IDLE);
    }

    pub fn activity(&mut self) {
        self.pending.insert(Interrupts::ACTIVITY);
    }

    pub fn error(&mut self) {
        self.pending.insert(Interrupts::ERROR);
    }

    pub fn sof(&mut self) {
        self.pending.insert(Interrupts::SOF);
    }
}

impl Sie for SimSie {
    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn enable(&mut self) {
        self.enabled = true;
    }

    fn single_ended_zero(&self) -> bool {
        self.se0
    }

    fn pending(&self) -> Interrupts {
        let mut flags = self.pending;
        flags.set(Interrupts::TRANSACTION, !self.fifo.is_empty());
        flags
    }

    fn enabled_interrupts(&self) -> Interrupts {
        self.enabled_ints
    }

    fn set_enabled_interrupts(&mut self, ints: Interrupts) {
        self.enabled_ints = ints;
    }

    fn clear(&mut self, ints: Interrupts) {
        self.pending.remove(ints);
        if ints.contains(Interrupts::TRANSACTION) {
            self.fifo.pop_front();
        }
    }

    fn transaction(&self) -> Option<Transaction> {
        self.fifo.front().copied()
    }

    fn address(&self) -> u8 {
        self.address
    }

    fn set_address(&mut self, address: u8) {
        self.address = address;
    }

    fn set_suspended(&mut self, suspended: bool) {
        self.suspended = suspended;
    }

    fn resume_packet_processing(&mut self) {
        self.frozen = false;
    }

    fn configure_endpoint(&mut self, endpoint: u8, mode: EndpointMode) {
        self.modes[usize::from(endpoint)] = mode;
    }

    fn take_control_stall(&mut self) -> bool {
        std::mem::replace(&mut self.control_stall, false)
    }

    fn read_bd(&self, slot: usize) -> BufferDescriptor {
        self.bdt[slot]
    }

    fn write_bd(&mut self, slot: usize, bd: BufferDescriptor) {
        self.bdt[slot] = bd;
    }

    fn read_ram(&self, address: u16, dst: &mut [u8]) {
        let start = usize::from(address);
        dst.copy_from_slice(&self.ram[start..start + dst.len()]);
    }

    fn write_ram(&mut self, address: u16, src: &[u8]) {
        let start = usize::from(address);
        self.ram[start..start + src.len()].copy_from_slice(src);
    }
}
