// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error taxonomy for the device stack.
//!
//! Nothing in here is fatal. Each variant maps onto a fixed recovery: a stall
//! on endpoint 0, a zero-byte transfer the caller retries on a later poll, or
//! a flag that simply gets cleared.

use core::fmt;

pub type Result<T> = core::result::Result<T, UsbError>;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UsbError {
    /// The host sent a request we don't implement, a malformed standard
    /// request, or a class/vendor request. Answered by stalling endpoint 0
    /// until the next SETUP.
    UnrecognizedRequest,
    /// Software tried to touch a buffer descriptor while the SIE owns it.
    /// Nothing was changed; try again once ownership comes back.
    OwnershipConflict,
    /// A payload didn't fit in one packet. The handshake primitives clamp
    /// silently instead of returning this; it exists so that callers who
    /// care can name the condition.
    OversizeTransfer,
    /// The SIE reported a signalling fault (CRC, bit stuffing, PID check,
    /// timeouts). Cleared and otherwise ignored.
    BusError,
}

impl fmt::Display for UsbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnrecognizedRequest => write!(f, "unrecognized request"),
            Self::OwnershipConflict => write!(f, "buffer descriptor owned by SIE"),
            Self::OversizeTransfer => write!(f, "transfer exceeds max packet size"),
            Self::BusError => write!(f, "bus error"),
        }
    }
}
