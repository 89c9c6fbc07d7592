// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The control transfer engine for endpoint 0.
//!
//! A control transfer is a SETUP transaction, zero or more DATA transactions
//! in one direction, and a zero-length STATUS transaction in the other. This
//! module tracks where we are in that sequence and drives the two endpoint 0
//! buffer descriptors accordingly. The status stage has no state of its own:
//! it's whatever completes after the data stage, and we answer it by going
//! back to waiting for a SETUP.
//!
//! A SETUP token always wins. Whatever stage was in flight is dropped on the
//! floor and the new request starts from scratch.

use log::{debug, trace, warn};

use crate::bulk;
use crate::descriptors::EP0_MAX_PACKET;
use crate::dispatch::{self, Effect, Payload};
use crate::endpoint::{Endpoint, Sync, EP0_IN, EP0_OUT};
use crate::error::{Result, UsbError};
use crate::sie::{Pid, Sie, Transaction};
use crate::state::{DeviceState, UsbState};
use crate::usb::{SetupPacket, UsbDir};

const EP0_PACKET: usize = EP0_MAX_PACKET as usize;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Waiting for a SETUP token. Also where the status stage lands.
    Setup,
    /// Receiving data from the host.
    DataOut,
    /// Sending data to the host.
    DataIn,
}

/// Context of the control transfer currently in progress.
pub struct ControlTransfer {
    stage: Stage,
    handled: bool,
    setup: Option<SetupPacket>,
    /// Where data-in chunks come from, and how far into it we are.
    payload: Payload,
    sent: usize,
    /// Bytes still to send in the data-in stage.
    remaining: u16,
    /// Bytes received in the data-out stage. May exceed what fit in
    /// `scratch`.
    received: u16,
    scratch: [u8; EP0_PACKET],
}

impl ControlTransfer {
    pub const fn new() -> Self {
        Self {
            stage: Stage::Setup,
            handled: false,
            setup: None,
            payload: Payload::Empty,
            sent: 0,
            remaining: 0,
            received: 0,
            scratch: [0; EP0_PACKET],
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn remaining(&self) -> u16 {
        self.remaining
    }

    /// Whether the current request was understood by the dispatcher.
    pub fn handled(&self) -> bool {
        self.handled
    }

    /// The SETUP packet that started the current transfer.
    pub fn setup(&self) -> Option<&SetupPacket> {
        self.setup.as_ref()
    }

    /// Total number of bytes received in the data-out stage.
    pub fn received_count(&self) -> u16 {
        self.received
    }

    /// The data-out payload, as much of it as fit in one max packet.
    pub fn received(&self) -> &[u8] {
        &self.scratch[..usize::from(self.received).min(EP0_PACKET)]
    }

    /// Forgets everything about the current transfer.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Handles a completed transaction on endpoint 0.
    pub fn on_transaction<S: Sie>(&mut self, sie: &mut S, state: &mut UsbState, t: Transaction) {
        match t.dir {
            UsbDir::Out => {
                if EP0_OUT.descriptor(sie).pid() == Some(Pid::Setup) {
                    self.setup_stage(sie, state);
                } else if self.stage == Stage::DataOut {
                    self.out_data_stage(sie);
                } else {
                    // Status stage of an IN transfer, or something we weren't
                    // expecting. Either way, get ready for the next SETUP. A
                    // host that ends the data stage early leaves a chunk armed
                    // on EP0 IN; take it back.
                    if self.stage == Stage::DataIn {
                        EP0_IN.reclaim(sie);
                    }
                    self.wait_for_setup(sie);
                }
            }
            UsbDir::In => {
                // A pending address takes effect once the status stage of the
                // SetAddress request is acknowledged at the old address.
                if let Some(address) = state.pending_address.take() {
                    sie.set_address(address);
                    if state.device == DeviceState::Configured {
                        // Readdressing drops the configuration with it.
                        state.configuration = 0;
                        state.halted = 0;
                        apply(sie, Effect::DeconfigureBulk);
                    }
                    state.device = if address == 0 {
                        DeviceState::Default
                    } else {
                        DeviceState::Address
                    };
                    debug!("address {} applied, state {:?}", address, state.device);
                }

                if self.stage == Stage::DataIn && self.remaining > 0 {
                    self.in_data_stage(sie, Sync::Toggle);
                } else {
                    self.wait_for_setup(sie);
                }
            }
        }
    }

    /// Called when the SIE reports that endpoint 0 stalled a token.
    pub fn on_stall<S: Sie>(&mut self, sie: &mut S) {
        self.wait_for_setup(sie);
    }

    /// Configures endpoint 0 to receive the next SETUP.
    ///
    /// If the SIE still owns the OUT descriptor (armed for a status stage, or
    /// stalled) it's left alone: a SETUP token is accepted either way. So is
    /// a descriptor already holding a SETUP that arrived before this call; its
    /// own transaction is still queued and will pick it up.
    pub fn wait_for_setup<S: Sie>(&mut self, sie: &mut S) {
        self.stage = Stage::Setup;
        let bd = EP0_OUT.descriptor(sie);
        if !bd.owned_by_sie() && bd.pid() != Some(Pid::Setup) {
            rearm(sie, &EP0_OUT, EP0_PACKET, Sync::Data0);
        }
    }

    fn setup_stage<S: Sie>(&mut self, sie: &mut S, state: &mut UsbState) {
        // The SIE has frozen packet processing. Take the IN side back as soon
        // as possible so a stale data stage can't go out.
        EP0_IN.reclaim(sie);
        EP0_OUT.reclaim(sie);

        let mut raw = [0; SetupPacket::SIZE];
        let len = EP0_OUT.drain(sie, &mut raw).unwrap_or(0);

        self.reset();
        // A SetAddress whose status stage never happened is void.
        state.pending_address = None;

        match self.dispatch(&raw[..len], state) {
            Err(e) => {
                warn!("EP0 stall: {} ({:02x?})", e, &raw[..len]);
                EP0_OUT.stall(sie);
                EP0_IN.stall(sie);
            }
            Ok((setup, effect)) => {
                self.handled = true;
                if let Some(effect) = effect {
                    apply(sie, effect);
                }
                if setup.direction() == UsbDir::In {
                    self.remaining = self
                        .payload
                        .len()
                        .min(usize::from(setup.length.get())) as u16;
                    self.in_data_stage(sie, Sync::Data1);
                    self.stage = Stage::DataIn;
                    // Room for the host's zero-length status packet.
                    rearm(sie, &EP0_OUT, EP0_PACKET, Sync::Data1);
                } else {
                    self.stage = Stage::DataOut;
                    // Zero-length status packet for when the host asks.
                    rearm(sie, &EP0_IN, 0, Sync::Data1);
                    rearm(sie, &EP0_OUT, EP0_PACKET, Sync::Data1);
                }
            }
        }

        sie.resume_packet_processing();
    }

    fn dispatch(&mut self, raw: &[u8], state: &mut UsbState) -> Result<(SetupPacket, Option<Effect>)> {
        let setup = SetupPacket::parse(raw).ok_or(UsbError::UnrecognizedRequest)?;
        self.setup = Some(setup);
        trace!(
            "SETUP {:02x} {:02x} value={:04x} index={:04x} length={}",
            setup.request_type,
            setup.request,
            setup.value.get(),
            setup.index.get(),
            setup.length.get()
        );
        let (next, reply) = dispatch::dispatch(&setup, state)?;
        *state = next;
        self.payload = reply.payload;
        Ok((setup, reply.effect))
    }

    /// Sends the next slice of the response.
    fn in_data_stage<S: Sie>(&mut self, sie: &mut S, sync: Sync) {
        let chunk = usize::from(self.remaining).min(EP0_PACKET);
        let data = &self.payload.as_bytes()[self.sent..self.sent + chunk];
        if let Err(e) = EP0_IN.fill(sie, data) {
            warn!("EP0 IN: {}", e);
            return;
        }
        rearm(sie, &EP0_IN, chunk, sync);
        self.sent += chunk;
        self.remaining -= chunk as u16;
        trace!("EP0 IN chunk {} bytes, {} remaining", chunk, self.remaining);
    }

    /// Collects one data-out packet and asks for the next.
    fn out_data_stage<S: Sie>(&mut self, sie: &mut S) {
        let mut packet = [0; EP0_PACKET];
        let len = match EP0_OUT.drain(sie, &mut packet) {
            Ok(len) => len,
            Err(e) => {
                warn!("EP0 OUT: {}", e);
                return;
            }
        };
        let start = usize::from(self.received).min(EP0_PACKET);
        let fit = len.min(EP0_PACKET - start);
        self.scratch[start..start + fit].copy_from_slice(&packet[..fit]);
        self.received = self.received.saturating_add(len as u16);
        rearm(sie, &EP0_OUT, EP0_PACKET, Sync::Toggle);
    }
}

impl Default for ControlTransfer {
    fn default() -> Self {
        Self::new()
    }
}

fn rearm<S: Sie>(sie: &mut S, ep: &Endpoint, len: usize, sync: Sync) {
    if let Err(e) = ep.arm(sie, len, sync) {
        warn!("EP{} {:?}: {}", ep.number, ep.dir, e);
    }
}

fn apply<S: Sie>(sie: &mut S, effect: Effect) {
    match effect {
        Effect::Halt(ep) => ep.stall(sie),
        Effect::Unhalt(ep) => bulk::restart(sie, ep),
        Effect::ConfigureBulk => bulk::configure(sie),
        Effect::DeconfigureBulk => bulk::deconfigure(sie),
    }
}
