// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `Sie` for the RP2040 USB controller.
//!
//! The RP2040 doesn't have a buffer descriptor table as such, but each
//! endpoint direction has a buffer control register in DPRAM that carries the
//! same information: `AVAILABLE_0` is ownership, `PID_0` is the data toggle,
//! `STALL` is the stall bit, and `LENGTH_0` is the byte count. This module
//! presents those registers as `BufferDescriptor`s.
//!
//! Two things need papering over:
//!
//! - SETUP packets don't arrive through EP0 OUT's buffer. They land in a
//!   dedicated pair of registers and raise `SETUP_REC`. We copy them into the
//!   EP0 buffer and make EP0 OUT's descriptor report a completed SETUP, which
//!   is what the rest of the stack expects.
//!
//! - There's no transaction status FIFO. Completed buffers are flagged in
//!   `BUFF_STATUS`, one bit per endpoint direction, and we hand them out
//!   lowest bit first, after any pending SETUP.
//!
//! Everything else maps across more or less directly.

use core::cell::Cell;

use rp2040_pac::{USBCTRL_DPRAM, USBCTRL_REGS};

use crate::endpoint::{EP0_IN, EP0_OUT, EP1_IN, EP1_OUT, EP2_IN, EP2_OUT};
use crate::sie::{self, stat, BufferDescriptor, EndpointMode, Interrupts, Pid, Sie, Transaction};
use crate::usb::{SetupPacket, UsbDir};

const EP0_OUT_SLOT: usize = sie::slot(0, UsbDir::Out);

/// DPRAM offset of the fixed EP0 buffer.
const EP0_BUFFER: usize = 0x100;
/// DPRAM offset where the other endpoints' buffers start. Must be 64-byte
/// aligned.
const DATA_BUFFERS: usize = 0x180;

/// Value of `ENDPOINT_TYPE` for bulk endpoints.
const BULK: u8 = 2;

/// Maps an address in the stack's USB RAM layout to a DPRAM offset. EP0's
/// shared buffer goes in the hardware's fixed EP0 slot; everything after it
/// moves up to the general buffer area.
fn dpram_offset(address: u16) -> usize {
    let address = usize::from(address);
    if address < usize::from(EP1_OUT.buffer) {
        EP0_BUFFER + address
    } else {
        DATA_BUFFERS + address - usize::from(EP1_OUT.buffer)
    }
}

/// Index into `ep_buffer_control`: IN then OUT for each endpoint, the reverse
/// of our slot order.
fn buffer_control_index(slot: usize) -> usize {
    let (endpoint, dir) = split(slot);
    usize::from(endpoint) * 2
        + match dir {
            UsbDir::In => 0,
            UsbDir::Out => 1,
        }
}

/// Index into `ep_control`, which starts at EP1.
fn endpoint_control_index(endpoint: u8, dir: UsbDir) -> usize {
    usize::from(endpoint - 1) * 2
        + match dir {
            UsbDir::In => 0,
            UsbDir::Out => 1,
        }
}

fn split(slot: usize) -> (u8, UsbDir) {
    let dir = if slot & 1 == 0 { UsbDir::Out } else { UsbDir::In };
    ((slot / 2) as u8, dir)
}

pub struct Rp2040Sie {
    regs: USBCTRL_REGS,
    dpram: USBCTRL_DPRAM,
    enabled_ints: Interrupts,
    /// Buffer address last written to each descriptor. The hardware keeps
    /// EP0's fixed and others' in `ep_control`, so this is only for reading
    /// descriptors back.
    buffers: [u16; 6],
    /// EP0 OUT is reporting a SETUP until software re-arms it.
    setup_latched: Cell<bool>,
}

impl Rp2040Sie {
    /// Takes over the controller. It must already be out of reset with its
    /// 48 MHz clock running.
    pub fn new(regs: USBCTRL_REGS, dpram: USBCTRL_DPRAM) -> Self {
        Self {
            regs,
            dpram,
            enabled_ints: Interrupts::empty(),
            buffers: [
                EP0_OUT.buffer,
                EP0_IN.buffer,
                EP1_OUT.buffer,
                EP1_IN.buffer,
                EP2_OUT.buffer,
                EP2_IN.buffer,
            ],
            setup_latched: Cell::new(false),
        }
    }

    fn ram(&self) -> *mut u8 {
        USBCTRL_DPRAM::ptr() as *mut u8
    }

    /// Copies the SETUP packet into the EP0 buffer and makes EP0 OUT look like
    /// it just received it.
    fn latch_setup(&self) {
        if self.setup_latched.get() {
            return;
        }
        let mut packet = [0; SetupPacket::SIZE];
        packet[..4].copy_from_slice(&self.dpram.setup_packet_low.read().bits().to_le_bytes());
        packet[4..].copy_from_slice(&self.dpram.setup_packet_high.read().bits().to_le_bytes());
        self.copy_in(EP0_OUT.buffer, &packet);
        self.dpram.ep_buffer_control[buffer_control_index(EP0_OUT_SLOT)]
            .write(|w| unsafe { w.length_0().bits(SetupPacket::SIZE as u16) });
        self.setup_latched.set(true);
    }

    fn copy_in(&self, address: u16, src: &[u8]) {
        let base = dpram_offset(address);
        for (i, b) in src.iter().enumerate() {
            // Safety: every address the stack uses maps inside DPRAM, and
            // software only writes buffers it owns.
            unsafe { self.ram().add(base + i).write_volatile(*b) };
        }
    }
}

impl Sie for Rp2040Sie {
    fn is_enabled(&self) -> bool {
        self.regs.main_ctrl.read().controller_en().bit()
    }

    fn enable(&mut self) {
        // Clear the control portion of DPRAM.
        self.dpram.setup_packet_low.write(|w| unsafe { w.bits(0) });
        self.dpram.setup_packet_high.write(|w| unsafe { w.bits(0) });
        for epc in &self.dpram.ep_control {
            epc.write(|w| unsafe { w.bits(0) });
        }
        for epb in &self.dpram.ep_buffer_control {
            epb.write(|w| unsafe { w.bits(0) });
        }

        // Onboard PHY, and pretend VBUS is always there: not every board
        // wires up VBUS detect.
        self.regs.usb_muxing.write(|w| w.to_phy().set_bit().softcon().set_bit());
        self.regs.usb_pwr.write(|w| {
            w.vbus_detect().set_bit().vbus_detect_override_en().set_bit()
        });
        self.regs.main_ctrl.write(|w| {
            w.controller_en().set_bit().host_ndevice().clear_bit()
        });
        // Flag every buffer that moves through EP0, and present as a
        // full-speed device.
        self.regs.sie_ctrl.write(|w| w.ep0_int_1buf().set_bit().pullup_en().set_bit());
    }

    fn single_ended_zero(&self) -> bool {
        self.regs.sie_status.read().line_state().bits() == 0
    }

    fn pending(&self) -> Interrupts {
        let s = self.regs.sie_status.read();
        let mut p = Interrupts::empty();
        if s.bus_reset().bit() {
            p.insert(Interrupts::RESET);
        }
        if s.crc_error().bit()
            || s.bit_stuff_error().bit()
            || s.rx_overflow().bit()
            || s.rx_timeout().bit()
            || s.data_seq_error().bit()
        {
            p.insert(Interrupts::ERROR);
        }
        if s.resume().bit() {
            p.insert(Interrupts::ACTIVITY);
        }
        if s.setup_rec().bit() || self.regs.buff_status.read().bits() != 0 {
            p.insert(Interrupts::TRANSACTION);
        }
        if s.suspended().bit() {
            p.insert(Interrupts::IDLE);
        }
        if s.stall_rec().bit() {
            p.insert(Interrupts::STALL);
        }
        if self.regs.ints.read().dev_sof().bit() {
            p.insert(Interrupts::SOF);
        }
        p
    }

    fn enabled_interrupts(&self) -> Interrupts {
        self.enabled_ints
    }

    fn set_enabled_interrupts(&mut self, ints: Interrupts) {
        // Polled, so this only decides which flags `UsbDevice` looks at.
        self.enabled_ints = ints;
    }

    fn clear(&mut self, ints: Interrupts) {
        // Status bits are write-one-to-clear.
        self.regs.sie_status.write(|w| {
            if ints.contains(Interrupts::RESET) {
                w.bus_reset().set_bit();
            }
            if ints.contains(Interrupts::ERROR) {
                w.crc_error()
                    .set_bit()
                    .bit_stuff_error()
                    .set_bit()
                    .rx_overflow()
                    .set_bit()
                    .rx_timeout()
                    .set_bit()
                    .data_seq_error()
                    .set_bit();
            }
            if ints.contains(Interrupts::ACTIVITY) {
                w.resume().set_bit();
            }
            if ints.contains(Interrupts::IDLE) {
                w.suspended().set_bit();
            }
            if ints.contains(Interrupts::STALL) {
                w.stall_rec().set_bit();
            }
            w
        });
        if ints.contains(Interrupts::SOF) {
            // Reading the frame number acknowledges the SOF.
            let _ = self.regs.sof_rd.read();
        }
        if ints.contains(Interrupts::TRANSACTION) {
            if self.regs.sie_status.read().setup_rec().bit() {
                self.regs.sie_status.write(|w| w.setup_rec().set_bit());
            } else {
                let bits = self.regs.buff_status.read().bits();
                if bits != 0 {
                    let lowest = bits & bits.wrapping_neg();
                    self.regs.buff_status.write(|w| unsafe { w.bits(lowest) });
                }
            }
        }
    }

    fn transaction(&self) -> Option<Transaction> {
        if self.regs.sie_status.read().setup_rec().bit() {
            self.latch_setup();
            return Some(Transaction { endpoint: 0, dir: UsbDir::Out });
        }
        let bits = self.regs.buff_status.read().bits();
        if bits == 0 {
            return None;
        }
        // Bits are IN then OUT for each endpoint.
        let i = bits.trailing_zeros();
        let dir = if i & 1 == 0 { UsbDir::In } else { UsbDir::Out };
        Some(Transaction { endpoint: (i >> 1) as u8, dir })
    }

    fn address(&self) -> u8 {
        self.regs.addr_endp.read().address().bits()
    }

    fn set_address(&mut self, address: u8) {
        self.regs.addr_endp.write(|w| unsafe { w.address().bits(address) });
    }

    fn set_suspended(&mut self, _suspended: bool) {
        // The controller manages its own clocks in suspend.
    }

    fn resume_packet_processing(&mut self) {
        // The controller never freezes on SETUP.
    }

    fn configure_endpoint(&mut self, endpoint: u8, mode: EndpointMode) {
        // EP0 is always a control endpoint with a fixed buffer.
        if endpoint == 0 {
            return;
        }
        for dir in [UsbDir::In, UsbDir::Out] {
            let slot = sie::slot(endpoint, dir);
            let offset = dpram_offset(self.buffers[slot]) as u16;
            self.dpram.ep_control[endpoint_control_index(endpoint, dir)].write(|w| unsafe {
                w.enable()
                    .bit(mode != EndpointMode::Disabled)
                    .interrupt_per_buff()
                    .set_bit()
                    .endpoint_type()
                    .bits(BULK)
                    .buffer_address()
                    .bits(offset)
            });
        }
    }

    // The arm bits stay set until the next SETUP clears them in hardware, so
    // this keeps reporting a stall for as long as EP0 is stalled.
    fn take_control_stall(&mut self) -> bool {
        let armed = self.regs.ep_stall_arm.read();
        armed.ep0_in().bit() || armed.ep0_out().bit()
    }

    fn read_bd(&self, slot: usize) -> BufferDescriptor {
        if slot == EP0_OUT_SLOT && self.setup_latched.get() {
            return BufferDescriptor::new(
                (Pid::Setup as u8) << stat::PID_SHIFT,
                SetupPacket::SIZE as u16,
                self.buffers[slot],
            );
        }
        let bc = self.dpram.ep_buffer_control[buffer_control_index(slot)].read();
        let (_, dir) = split(slot);
        let mut bits = 0;
        if bc.available_0().bit() || bc.stall().bit() {
            bits |= stat::UOWN | stat::DTSEN;
            if bc.stall().bit() {
                bits |= stat::BSTALL;
            }
        } else {
            let pid = match dir {
                UsbDir::Out => Pid::Out,
                UsbDir::In => Pid::In,
            };
            bits |= (pid as u8) << stat::PID_SHIFT;
        }
        if bc.pid_0().bit() {
            bits |= stat::DTS;
        }
        BufferDescriptor::new(bits, bc.length_0().bits(), self.buffers[slot])
    }

    fn write_bd(&mut self, slot: usize, bd: BufferDescriptor) {
        self.buffers[slot] = bd.address();
        if slot == EP0_OUT_SLOT {
            self.setup_latched.set(false);
        }
        let (endpoint, dir) = split(slot);
        let owned = bd.owned_by_sie();
        let stall = owned && bd.stalled();
        if endpoint == 0 {
            self.regs.ep_stall_arm.modify(|_, w| match dir {
                UsbDir::In => w.ep0_in().bit(stall),
                UsbDir::Out => w.ep0_out().bit(stall),
            });
        }
        self.dpram.ep_buffer_control[buffer_control_index(slot)].write(|w| unsafe {
            w.pid_0()
                .bit(bd.data1())
                .full_0()
                .bit(dir == UsbDir::In && owned && !stall)
                .stall()
                .bit(stall)
                .length_0()
                .bits(bd.count())
                .available_0()
                .bit(owned && !stall)
        });
    }

    fn read_ram(&self, address: u16, dst: &mut [u8]) {
        let base = dpram_offset(address);
        for (i, b) in dst.iter_mut().enumerate() {
            // Safety: as in `copy_in`; software only reads buffers it owns.
            *b = unsafe { self.ram().add(base + i).read_volatile() };
        }
    }

    fn write_ram(&mut self, address: u16, src: &[u8]) {
        self.copy_in(address, src);
    }
}
