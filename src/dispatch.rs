// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Standard request handling, USB 2.0 chapter 9.4.
//!
//! `dispatch` is a pure function of the setup packet and the current session
//! state. It never touches the SIE; anything that has to happen to hardware
//! comes back as an `Effect` for the control transfer engine to carry out.

use num_traits::FromPrimitive;

use crate::descriptors;
use crate::endpoint::{self, Endpoint};
use crate::error::{Result, UsbError};
use crate::state::{DeviceState, UsbState};
use crate::usb::{
    Recipient, RequestKind, SetupPacket, StandardRequestCode, UsbDescType, UsbDir,
    FEATURE_DEVICE_REMOTE_WAKEUP, FEATURE_ENDPOINT_HALT,
};

/// A decoded standard request.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StandardRequest {
    GetStatus { recipient: Recipient, index: u16 },
    ClearFeature { recipient: Recipient, feature: u16, index: u16 },
    SetFeature { recipient: Recipient, feature: u16, index: u16 },
    SetAddress(u8),
    GetDescriptor { kind: u8, index: u8, length: u16 },
    GetConfiguration,
    SetConfiguration(u8),
    GetInterface { interface: u16 },
    SetInterface { interface: u16, alternate: u16 },
}

impl StandardRequest {
    /// Decodes a setup packet. Class and vendor requests, unknown or
    /// unsupported request codes, and requests whose direction bit doesn't
    /// match the request all come back as `UnrecognizedRequest`.
    pub fn decode(setup: &SetupPacket) -> Result<Self> {
        if setup.kind() != RequestKind::Standard {
            return Err(UsbError::UnrecognizedRequest);
        }
        let recipient = setup.recipient().ok_or(UsbError::UnrecognizedRequest)?;
        let code =
            StandardRequestCode::from_u8(setup.request).ok_or(UsbError::UnrecognizedRequest)?;
        let value = setup.value.get();
        let index = setup.index.get();

        let (request, dir) = match code {
            StandardRequestCode::GetStatus => {
                (Self::GetStatus { recipient, index }, UsbDir::In)
            }
            StandardRequestCode::ClearFeature => (
                Self::ClearFeature { recipient, feature: value, index },
                UsbDir::Out,
            ),
            StandardRequestCode::SetFeature => (
                Self::SetFeature { recipient, feature: value, index },
                UsbDir::Out,
            ),
            StandardRequestCode::SetAddress => (Self::SetAddress(setup.value_low()), UsbDir::Out),
            StandardRequestCode::GetDescriptor => (
                Self::GetDescriptor {
                    kind: setup.value_high(),
                    index: setup.value_low(),
                    length: setup.length.get(),
                },
                UsbDir::In,
            ),
            StandardRequestCode::GetConfiguration => (Self::GetConfiguration, UsbDir::In),
            StandardRequestCode::SetConfiguration => {
                (Self::SetConfiguration(setup.value_low()), UsbDir::Out)
            }
            StandardRequestCode::GetInterface => {
                (Self::GetInterface { interface: index }, UsbDir::In)
            }
            StandardRequestCode::SetInterface => (
                Self::SetInterface { interface: index, alternate: value },
                UsbDir::Out,
            ),
            StandardRequestCode::SetDescriptor | StandardRequestCode::SynchFrame => {
                return Err(UsbError::UnrecognizedRequest)
            }
        };
        if setup.direction() != dir {
            return Err(UsbError::UnrecognizedRequest);
        }
        Ok(request)
    }
}

/// What goes back to the host in the data stage.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    Empty,
    /// A slice of one of the static descriptor tables.
    Table(&'static [u8]),
    /// A short computed answer (status word, configuration value).
    Inline { bytes: [u8; 2], len: u8 },
}

impl Payload {
    fn byte(b: u8) -> Self {
        Self::Inline { bytes: [b, 0], len: 1 }
    }

    fn word(w: u16) -> Self {
        Self::Inline { bytes: w.to_le_bytes(), len: 2 }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Empty => &[],
            Self::Table(t) => t,
            Self::Inline { bytes, len } => &bytes[..usize::from(*len)],
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Hardware work that has to accompany a state change.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    /// Stall the endpoint until the host clears the halt.
    Halt(&'static Endpoint),
    /// Clear a halt and restart the endpoint at DATA0.
    Unhalt(&'static Endpoint),
    /// Enable the bulk endpoints and put their descriptors in their initial
    /// state.
    ConfigureBulk,
    /// Disable the bulk endpoints.
    DeconfigureBulk,
}

/// The dispatcher's answer to a request it understood.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    pub payload: Payload,
    pub effect: Option<Effect>,
}

impl Reply {
    const fn ack() -> Self {
        Self { payload: Payload::Empty, effect: None }
    }

    const fn data(payload: Payload) -> Self {
        Self { payload, effect: None }
    }

    const fn with(effect: Effect) -> Self {
        Self { payload: Payload::Empty, effect: Some(effect) }
    }
}

/// Decides how to answer `setup` given `state`. On success returns the state
/// to adopt and the reply; on `Err` the caller should stall endpoint 0.
pub fn dispatch(setup: &SetupPacket, state: &UsbState) -> Result<(UsbState, Reply)> {
    let state = *state;
    match StandardRequest::decode(setup)? {
        StandardRequest::GetStatus { recipient, index } => get_status(state, recipient, index),
        StandardRequest::ClearFeature { recipient, feature, index } => {
            feature_request(state, false, recipient, feature, index)
        }
        StandardRequest::SetFeature { recipient, feature, index } => {
            feature_request(state, true, recipient, feature, index)
        }
        StandardRequest::SetAddress(address) => set_address(state, address),
        StandardRequest::GetDescriptor { kind, index, length } => {
            get_descriptor(state, kind, index, length)
        }
        StandardRequest::GetConfiguration => Ok((state, Reply::data(Payload::byte(state.configuration)))),
        StandardRequest::SetConfiguration(value) => set_configuration(state, value),
        StandardRequest::GetInterface { interface } => get_interface(state, interface),
        StandardRequest::SetInterface { interface, alternate } => {
            set_interface(state, interface, alternate)
        }
    }
}

/// Resolves the `wIndex` of an endpoint-recipient request.
fn endpoint_of(index: u16) -> Result<&'static Endpoint> {
    u8::try_from(index)
        .ok()
        .and_then(endpoint::by_address)
        .ok_or(UsbError::UnrecognizedRequest)
}

fn get_status(state: UsbState, recipient: Recipient, index: u16) -> Result<(UsbState, Reply)> {
    let word = match recipient {
        Recipient::Device => u16::from(state.self_powered) | u16::from(state.remote_wakeup) << 1,
        Recipient::Interface if index == 0 => 0,
        Recipient::Endpoint => u16::from(state.is_halted(endpoint_of(index)?)),
        _ => return Err(UsbError::UnrecognizedRequest),
    };
    Ok((state, Reply::data(Payload::word(word))))
}

fn feature_request(
    state: UsbState,
    set: bool,
    recipient: Recipient,
    feature: u16,
    index: u16,
) -> Result<(UsbState, Reply)> {
    match recipient {
        Recipient::Device if feature == FEATURE_DEVICE_REMOTE_WAKEUP => {
            Ok((UsbState { remote_wakeup: set, ..state }, Reply::ack()))
        }
        Recipient::Endpoint if feature == FEATURE_ENDPOINT_HALT => {
            let ep = endpoint_of(index)?;
            // Endpoint 0 can't be halted; it only stalls per request.
            if ep.number == 0 {
                return Err(UsbError::UnrecognizedRequest);
            }
            let effect = if set { Effect::Halt(ep) } else { Effect::Unhalt(ep) };
            Ok((state.with_halt(ep, set), Reply::with(effect)))
        }
        _ => Err(UsbError::UnrecognizedRequest),
    }
}

fn set_address(state: UsbState, address: u8) -> Result<(UsbState, Reply)> {
    if address > 0x7F {
        return Err(UsbError::UnrecognizedRequest);
    }
    Ok((
        UsbState { pending_address: Some(address), ..state },
        Reply::ack(),
    ))
}

fn get_descriptor(
    state: UsbState,
    kind: u8,
    index: u8,
    length: u16,
) -> Result<(UsbState, Reply)> {
    let kind = UsbDescType::from_u8(kind).ok_or(UsbError::UnrecognizedRequest)?;
    let table = descriptors::lookup(kind, index).ok_or(UsbError::UnrecognizedRequest)?;
    let len = table.len().min(usize::from(length));
    Ok((state, Reply::data(Payload::Table(&table[..len]))))
}

fn set_configuration(state: UsbState, value: u8) -> Result<(UsbState, Reply)> {
    if value == 0 {
        let state = UsbState {
            device: DeviceState::Address,
            configuration: 0,
            halted: 0,
            ..state
        };
        Ok((state, Reply::with(Effect::DeconfigureBulk)))
    } else {
        let state = UsbState {
            device: DeviceState::Configured,
            configuration: value,
            halted: 0,
            ..state
        };
        Ok((state, Reply::with(Effect::ConfigureBulk)))
    }
}

fn get_interface(state: UsbState, interface: u16) -> Result<(UsbState, Reply)> {
    if interface != 0 {
        return Err(UsbError::UnrecognizedRequest);
    }
    // No alternate settings, so always 0.
    Ok((state, Reply::data(Payload::byte(0))))
}

fn set_interface(state: UsbState, interface: u16, alternate: u16) -> Result<(UsbState, Reply)> {
    if interface != 0 || alternate != 0 {
        return Err(UsbError::UnrecognizedRequest);
    }
    Ok((state, Reply::ack()))
}
