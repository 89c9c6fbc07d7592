// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Firmware for a USB-attached braille embosser.
//!
//! The bulk of this crate is a small USB full-speed device stack built
//! around a buffer-descriptor SIE (the kind where each endpoint direction
//! has a 4-byte descriptor whose `UOWN` bit says whether software or the
//! hardware gets to touch it). It enumerates as a single-interface printer
//! class device with two pairs of bulk endpoints:
//!
//! - EP1, 7-byte packets, carrying lines of dots to emboss.
//! - EP2, 1-byte packets, carrying opcodes (see `app::Instruction`).
//!
//! Hardware is reached only through the `sie::Sie` trait. The `rp2040`
//! feature provides an implementation for the RP2040's USB controller, plus
//! the firmware binary that runs it.
//!
//! Everything is polled. A main loop calls `UsbDevice::attach`,
//! `UsbDevice::poll`, and `Embosser::service` over and over; none of them
//! block waiting on the host.

#![cfg_attr(not(test), no_std)]

pub mod app;
pub mod bulk;
pub mod control;
pub mod descriptors;
pub mod device;
pub mod dispatch;
pub mod endpoint;
pub mod error;
pub mod sie;
pub mod state;
pub mod usb;

#[cfg(feature = "rp2040")]
pub mod rp2040;

pub use app::{Actuator, Adc, Embosser, EmbosserConfig};
pub use device::UsbDevice;
pub use error::{Result, UsbError};
pub use sie::Sie;
