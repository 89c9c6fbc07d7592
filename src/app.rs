// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The embosser itself: opcodes in on EP2, lines in on EP1, motion out
//! through an `Actuator`.
//!
//! `Embosser::service` is meant to be called from the same loop that polls
//! the USB device. It does at most one unit of work per call and never waits
//! on the bus: replies that can't go out yet are held and retried next time,
//! and no new command is read until they've gone.

use log::{debug, trace, warn};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use crate::descriptors::{LINE_ENDPOINT, LINE_MAX_PACKET, OPCODE_ENDPOINT};
use crate::device::UsbDevice;
use crate::sie::Sie;

const LINE_LEN: usize = LINE_MAX_PACKET as usize;

/// Dots per byte of a print line.
const DOTS_PER_BYTE: u16 = 8;

/// Highest channel the ADC multiplexer has.
pub const MAX_ADC_CHANNEL: u8 = 13;

/// Opcodes accepted on the instruction endpoint.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum Instruction {
    /// Return the carriage home and forget any half-finished command.
    Reset = 0,
    /// The next packet on the line endpoint is a line to emboss.
    Print = 1,
    MovShort = 2,
    MovLong = 3,
    RotShort = 4,
    RotLong = 5,
    /// Feed paper until the paper sensor sees it.
    PullPaper = 6,
    /// Report sensors on the instruction endpoint and an ADC sample on the
    /// line endpoint.
    Status = 7,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Towards the home position.
    Left,
    Right,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Sensor {
    Paper,
    CarriageHome,
}

/// The motors, hammer, and sensors. Implementations do their own timing;
/// each call returns when the motion is done.
pub trait Actuator {
    fn move_carriage(&mut self, steps: u16, direction: Direction);
    fn move_paper(&mut self, steps: u16);
    fn fire_hammer(&mut self);
    fn sensor(&self, sensor: Sensor) -> bool;
}

/// Analog sampling. Blocks until the conversion is done and returns the
/// right-justified 10-bit result.
pub trait Adc {
    fn read_channel(&mut self, channel: u8) -> u16;
}

/// How an ADC sample is reported to the host.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AdcResolution {
    /// The top 8 of 10 bits, one byte.
    High8,
    /// All 10 bits, two bytes little-endian.
    Full10,
}

impl AdcResolution {
    fn encode(self, sample: u16, out: &mut [u8]) -> usize {
        let sample = sample & 0x3FF;
        match self {
            Self::High8 => {
                out[0] = (sample >> 2) as u8;
                1
            }
            Self::Full10 => {
                out[..2].copy_from_slice(&sample.to_le_bytes());
                2
            }
        }
    }
}

/// Step counts and other knobs for a particular mechanism.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EmbosserConfig {
    pub short_move: u16,
    pub long_move: u16,
    pub short_rotate: u16,
    pub long_rotate: u16,
    /// Carriage steps between two dots.
    pub dot_pitch: u16,
    /// Paper steps between two lines.
    pub line_feed: u16,
    /// Give up looking for the home sensor after this many carriage steps.
    pub max_return_steps: u16,
    /// Give up looking for paper after this many feed steps.
    pub max_feed_steps: u16,
    pub adc_channel: u8,
    pub adc_resolution: AdcResolution,
}

impl Default for EmbosserConfig {
    fn default() -> Self {
        Self {
            short_move: 4,
            long_move: 32,
            short_rotate: 4,
            long_rotate: 32,
            dot_pitch: 2,
            line_feed: 16,
            max_return_steps: 512,
            max_feed_steps: 400,
            adc_channel: 7,
            adc_resolution: AdcResolution::High8,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Reading opcodes.
    Idle,
    /// A PRINT was received; reading a line.
    AwaitingLine,
}

/// A reply waiting for its IN endpoint to free up.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct Outgoing {
    bytes: [u8; LINE_LEN],
    len: usize,
}

impl Outgoing {
    fn new(src: &[u8]) -> Self {
        let mut bytes = [0; LINE_LEN];
        let len = src.len().min(LINE_LEN);
        bytes[..len].copy_from_slice(&src[..len]);
        Self { bytes, len }
    }

    fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

pub struct Embosser<A, D> {
    actuator: A,
    adc: D,
    config: EmbosserConfig,
    mode: Mode,
    /// Pending reply on the line endpoint: an echo or an ADC sample.
    line_reply: Option<Outgoing>,
    /// Pending reply on the instruction endpoint: sensor bits.
    status_reply: Option<u8>,
    lines_printed: u32,
}

impl<A: Actuator, D: Adc> Embosser<A, D> {
    pub fn new(actuator: A, adc: D, config: EmbosserConfig) -> Self {
        Self {
            actuator,
            adc,
            config,
            mode: Mode::Idle,
            line_reply: None,
            status_reply: None,
            lines_printed: 0,
        }
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn lines_printed(&self) -> u32 {
        self.lines_printed
    }

    /// Does whatever the host has asked for since the last call, if the
    /// device is configured.
    pub fn service<S: Sie>(&mut self, usb: &mut UsbDevice, sie: &mut S) {
        if !usb.is_configured() || !self.flush(usb, sie) {
            return;
        }
        match self.mode {
            Mode::Idle => {
                let mut opcode = [0];
                if usb.read(sie, OPCODE_ENDPOINT, &mut opcode) == 0 {
                    return;
                }
                match Instruction::from_u8(opcode[0]) {
                    Some(instruction) => self.execute(instruction),
                    None => warn!("unknown opcode {:#04x}", opcode[0]),
                }
            }
            Mode::AwaitingLine => {
                let mut line = [0; LINE_LEN];
                let len = usb.read(sie, LINE_ENDPOINT, &mut line);
                if len == 0 {
                    return;
                }
                self.emboss(&line[..len]);
                self.line_reply = Some(Outgoing::new(&line[..len]));
                self.mode = Mode::Idle;
            }
        }
        // Try to get replies out now rather than next time around.
        self.flush(usb, sie);
    }

    /// Sends pending replies. Returns true once nothing is pending.
    fn flush<S: Sie>(&mut self, usb: &mut UsbDevice, sie: &mut S) -> bool {
        if let Some(status) = self.status_reply {
            if usb.write(sie, OPCODE_ENDPOINT, &[status]) == 0 {
                return false;
            }
            self.status_reply = None;
        }
        if let Some(reply) = self.line_reply {
            if usb.write(sie, LINE_ENDPOINT, reply.as_bytes()) == 0 {
                return false;
            }
            self.line_reply = None;
        }
        true
    }

    fn execute(&mut self, instruction: Instruction) {
        trace!("{:?}", instruction);
        let c = self.config;
        match instruction {
            Instruction::Reset => {
                self.home();
                self.mode = Mode::Idle;
            }
            Instruction::Print => self.mode = Mode::AwaitingLine,
            Instruction::MovShort => self.actuator.move_carriage(c.short_move, Direction::Right),
            Instruction::MovLong => self.actuator.move_carriage(c.long_move, Direction::Right),
            Instruction::RotShort => self.actuator.move_paper(c.short_rotate),
            Instruction::RotLong => self.actuator.move_paper(c.long_rotate),
            Instruction::PullPaper => self.pull_paper(),
            Instruction::Status => {
                self.status_reply = Some(self.sensor_bits());
                let sample = self.sample();
                let mut bytes = [0; 2];
                let len = c.adc_resolution.encode(sample, &mut bytes);
                self.line_reply = Some(Outgoing::new(&bytes[..len]));
            }
        }
    }

    /// Embosses one line, one dot per bit, least significant bit first, then
    /// returns the carriage and feeds one line.
    fn emboss(&mut self, line: &[u8]) {
        let pitch = self.config.dot_pitch;
        let mut travelled: u16 = 0;
        for &byte in line {
            for bit in 0..DOTS_PER_BYTE {
                if byte & (1 << bit) != 0 {
                    self.actuator.fire_hammer();
                }
                self.actuator.move_carriage(pitch, Direction::Right);
                travelled = travelled.saturating_add(pitch);
            }
        }
        self.actuator.move_carriage(travelled, Direction::Left);
        self.actuator.move_paper(self.config.line_feed);
        self.lines_printed += 1;
        debug!("line {} embossed ({} bytes)", self.lines_printed, line.len());
    }

    fn home(&mut self) {
        let mut steps = 0;
        while !self.actuator.sensor(Sensor::CarriageHome) && steps < self.config.max_return_steps {
            self.actuator.move_carriage(1, Direction::Left);
            steps += 1;
        }
    }

    fn pull_paper(&mut self) {
        let mut steps = 0;
        while !self.actuator.sensor(Sensor::Paper) && steps < self.config.max_feed_steps {
            self.actuator.move_paper(1);
            steps += 1;
        }
        if !self.actuator.sensor(Sensor::Paper) {
            warn!("no paper after {} steps", steps);
        }
    }

    fn sensor_bits(&self) -> u8 {
        u8::from(self.actuator.sensor(Sensor::Paper))
            | u8::from(self.actuator.sensor(Sensor::CarriageHome)) << 1
    }

    fn sample(&mut self) -> u16 {
        if self.config.adc_channel > MAX_ADC_CHANNEL {
            return 0;
        }
        self.adc.read_channel(self.config.adc_channel)
    }
}
