// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Visible device state, USB 2.0 chapter 9.1.1.

use crate::endpoint::Endpoint;

/// Where the device is in its lifecycle. Ordered: anything below `Default`
/// hasn't seen a bus reset yet and ignores traffic.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeviceState {
    Detached,
    Attached,
    Powered,
    Default,
    Address,
    Configured,
}

/// Everything the stack remembers about its session with the host.
///
/// This is small and `Copy` so that the request dispatcher can take it by
/// reference and return an updated copy, instead of mutating in place.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct UsbState {
    pub device: DeviceState,
    /// Orthogonal to `device`: the bus has gone idle and we're pretending to
    /// sleep.
    pub suspended: bool,
    pub self_powered: bool,
    pub remote_wakeup: bool,
    /// Value from the last `SetConfiguration`, 0 when unconfigured.
    pub configuration: u8,
    /// When the host gives us a new address, we can't just slap it into the
    /// address register right away, because the status stage of that very
    /// request has to complete at the _old_ address. It waits here until the
    /// status IN goes out.
    pub pending_address: Option<u8>,
    /// One bit per endpoint slot (see `sie::slot`) that the host has halted.
    pub halted: u16,
}

impl UsbState {
    pub const fn new() -> Self {
        Self {
            device: DeviceState::Detached,
            suspended: false,
            self_powered: false,
            remote_wakeup: false,
            configuration: 0,
            pending_address: None,
            halted: 0,
        }
    }

    /// The state right after a bus reset.
    pub const fn after_reset() -> Self {
        Self {
            device: DeviceState::Default,
            ..Self::new()
        }
    }

    /// Bulk endpoints only move data in the Configured state, and not while
    /// suspended.
    pub fn bulk_ready(&self) -> bool {
        self.device == DeviceState::Configured && !self.suspended
    }

    pub fn is_halted(&self, ep: &Endpoint) -> bool {
        self.halted & (1 << ep.slot()) != 0
    }

    pub fn with_halt(mut self, ep: &Endpoint, halted: bool) -> Self {
        if halted {
            self.halted |= 1 << ep.slot();
        } else {
            self.halted &= !(1 << ep.slot());
        }
        self
    }
}

impl Default for UsbState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{EP1_IN, EP2_OUT};

    #[test]
    fn lifecycle_is_ordered() {
        assert!(DeviceState::Detached < DeviceState::Attached);
        assert!(DeviceState::Powered < DeviceState::Default);
        assert!(DeviceState::Address < DeviceState::Configured);
    }

    #[test]
    fn reset_state_is_clean() {
        let s = UsbState::after_reset();
        assert_eq!(s.device, DeviceState::Default);
        assert!(!s.remote_wakeup && !s.self_powered && !s.suspended);
        assert_eq!(s.configuration, 0);
        assert_eq!(s.pending_address, None);
        assert_eq!(s.halted, 0);
    }

    #[test]
    fn bulk_gating() {
        let mut s = UsbState::after_reset();
        assert!(!s.bulk_ready());
        s.device = DeviceState::Configured;
        assert!(s.bulk_ready());
        s.suspended = true;
        assert!(!s.bulk_ready());
    }

    #[test]
    fn halt_bits_are_per_direction() {
        let s = UsbState::new().with_halt(&EP1_IN, true);
        assert!(s.is_halted(&EP1_IN));
        assert!(!s.is_halted(&EP2_OUT));
        let s = s.with_halt(&EP2_OUT, true).with_halt(&EP1_IN, false);
        assert!(!s.is_halted(&EP1_IN));
        assert!(s.is_halted(&EP2_OUT));
    }
}
