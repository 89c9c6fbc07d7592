// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The device: lifecycle and the event pump.
//!
//! `UsbDevice` doesn't own the SIE. Every entry point borrows it, so the same
//! device can run against real hardware in firmware and a simulated SIE in
//! tests, and the application can talk to the SIE between polls.

use log::{debug, warn};

use crate::bulk;
use crate::control::ControlTransfer;
use crate::endpoint::{BULK_ENDPOINTS, EP0_IN, EP0_OUT};
use crate::error::UsbError;
use crate::sie::{EndpointMode, Interrupts, Sie};
use crate::state::{DeviceState, UsbState};

/// Interrupt sources watched once the bus has been reset. Activity is only
/// interesting while suspended.
const RUNNING_INTERRUPTS: Interrupts = Interrupts::all().difference(Interrupts::ACTIVITY);

pub struct UsbDevice {
    state: UsbState,
    control: ControlTransfer,
}

impl UsbDevice {
    pub const fn new() -> Self {
        Self {
            state: UsbState::new(),
            control: ControlTransfer::new(),
        }
    }

    pub fn state(&self) -> &UsbState {
        &self.state
    }

    pub fn control(&self) -> &ControlTransfer {
        &self.control
    }

    pub fn is_configured(&self) -> bool {
        self.state.device == DeviceState::Configured
    }

    /// Reported to the host in `GetStatus(device)`.
    pub fn set_self_powered(&mut self, self_powered: bool) {
        self.state.self_powered = self_powered;
    }

    /// Brings the USB module up and, once the bus is being driven, moves to
    /// Powered. Call it repeatedly until it does; it's cheap when there's
    /// nothing to do.
    pub fn attach<S: Sie>(&mut self, sie: &mut S) {
        if !sie.is_enabled() {
            sie.enable();
            sie.set_enabled_interrupts(Interrupts::empty());
            self.state.device = DeviceState::Attached;
            debug!("USB module enabled");
        }
        if self.state.device == DeviceState::Attached && !sie.single_ended_zero() {
            sie.clear(Interrupts::all());
            sie.set_enabled_interrupts(Interrupts::RESET | Interrupts::IDLE);
            self.state.device = DeviceState::Powered;
            debug!("powered");
        }
    }

    /// Services every pending, enabled SIE event. Never blocks.
    pub fn poll<S: Sie>(&mut self, sie: &mut S) {
        if self.state.device == DeviceState::Detached {
            return;
        }
        let events = sie.pending().intersection(sie.enabled_interrupts());

        if events.contains(Interrupts::ACTIVITY) {
            self.resume(sie);
        }
        if self.state.suspended {
            return;
        }
        if events.contains(Interrupts::RESET) {
            // Reset wipes every other flag along with it.
            self.bus_reset(sie);
            return;
        }
        if events.contains(Interrupts::IDLE) {
            self.suspend(sie);
        }
        if events.contains(Interrupts::SOF) {
            sie.clear(Interrupts::SOF);
        }
        if events.contains(Interrupts::STALL) {
            if sie.take_control_stall() {
                self.control.on_stall(sie);
            }
            sie.clear(Interrupts::STALL);
        }
        if events.contains(Interrupts::ERROR) {
            warn!("{}", UsbError::BusError);
            sie.clear(Interrupts::ERROR);
        }

        if self.state.device < DeviceState::Default || self.state.suspended {
            return;
        }
        if events.contains(Interrupts::TRANSACTION) {
            if let Some(t) = sie.transaction() {
                // Bulk completions need no bookkeeping here; the descriptor
                // itself tells `bulk::read`/`bulk::write` when it's done.
                if t.endpoint == 0 {
                    self.control.on_transaction(sie, &mut self.state, t);
                }
            }
            sie.clear(Interrupts::TRANSACTION);
        }
    }

    /// Queues up to one packet on bulk IN endpoint `number`. See
    /// `bulk::write`.
    pub fn write<S: Sie>(&mut self, sie: &mut S, number: u8, bytes: &[u8]) -> usize {
        bulk::write(sie, &self.state, number, bytes)
    }

    /// Takes the last packet from bulk OUT endpoint `number`. See
    /// `bulk::read`.
    pub fn read<S: Sie>(&mut self, sie: &mut S, number: u8, buf: &mut [u8]) -> usize {
        bulk::read(sie, &self.state, number, buf)
    }

    fn bus_reset<S: Sie>(&mut self, sie: &mut S) {
        sie.clear(Interrupts::all());
        // Each clear pops one entry off the transaction FIFO.
        while sie.pending().contains(Interrupts::TRANSACTION) {
            sie.clear(Interrupts::TRANSACTION);
        }
        sie.set_enabled_interrupts(RUNNING_INTERRUPTS);
        sie.set_address(0);
        sie.set_suspended(false);

        sie.configure_endpoint(0, EndpointMode::Control);
        for number in [1, 2] {
            sie.configure_endpoint(number, EndpointMode::Disabled);
        }
        EP0_OUT.reset(sie);
        EP0_IN.reset(sie);
        for ep in BULK_ENDPOINTS {
            ep.reset(sie);
        }

        self.state = UsbState::after_reset();
        self.control.reset();
        self.control.wait_for_setup(sie);
        sie.resume_packet_processing();
        debug!("bus reset");
    }

    fn suspend<S: Sie>(&mut self, sie: &mut S) {
        let enabled = sie.enabled_interrupts();
        sie.set_enabled_interrupts(enabled | Interrupts::ACTIVITY);
        sie.clear(Interrupts::IDLE);
        sie.set_suspended(true);
        self.state.suspended = true;
        debug!("suspended");
    }

    fn resume<S: Sie>(&mut self, sie: &mut S) {
        sie.set_suspended(false);
        let enabled = sie.enabled_interrupts();
        sie.set_enabled_interrupts(enabled.difference(Interrupts::ACTIVITY));
        sie.clear(Interrupts::ACTIVITY);
        self.state.suspended = false;
        debug!("resumed");
    }
}

impl Default for UsbDevice {
    fn default() -> Self {
        Self::new()
    }
}
