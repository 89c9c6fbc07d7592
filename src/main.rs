// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Embosser firmware for RP2040 boards.
//!
//! This brings up clocks and the peripherals the embosser needs, then sits in
//! a loop polling the USB stack and servicing the embosser. There are no
//! interrupts and no HAL; each register write is right here.
//!
//! The mechanism is driven through plain GPIOs: step and direction lines for
//! the carriage, a step line for the paper feed, a hammer solenoid, and two
//! active-low sensor inputs. Pin assignments depend on the board feature.
//!
//! # A note on `unsafe`
//!
//! Nearly all the `unsafe` below is inside register `write`/`modify` closures,
//! where `rp2040_pac` marks raw-bits setters as unsafe whether or not they
//! can do harm. Those aren't commented.

#![no_std]
#![no_main]

use cortex_m_rt::entry;
use panic_halt as _;

use usb_embosser::app::{Direction, Sensor};
use usb_embosser::rp2040::Rp2040Sie;
use usb_embosser::{Actuator, Adc, Embosser, EmbosserConfig, UsbDevice};

// GPIO numbers of the mechanism's lines. The LED is lit while the host has us
// configured.
cfg_if::cfg_if! {
    if #[cfg(feature = "target-pico")] {
        const LED_PIN: u8 = 25;
        const CARRIAGE_STEP_PIN: u8 = 2;
        const CARRIAGE_DIR_PIN: u8 = 3;
        const PAPER_STEP_PIN: u8 = 4;
        const HAMMER_PIN: u8 = 5;
        const PAPER_SENSE_PIN: u8 = 6;
        const HOME_SENSE_PIN: u8 = 7;
    } else if #[cfg(feature = "target-feather")] {
        const LED_PIN: u8 = 13;
        const CARRIAGE_STEP_PIN: u8 = 6;
        const CARRIAGE_DIR_PIN: u8 = 7;
        const PAPER_STEP_PIN: u8 = 8;
        const HAMMER_PIN: u8 = 9;
        const PAPER_SENSE_PIN: u8 = 10;
        const HOME_SENSE_PIN: u8 = 11;
    } else {
        compile_error!("missing or unknown target-* feature");
    }
}

const OUTPUT_PINS: [u8; 5] = [LED_PIN, CARRIAGE_STEP_PIN, CARRIAGE_DIR_PIN, PAPER_STEP_PIN, HAMMER_PIN];
const INPUT_PINS: [u8; 2] = [PAPER_SENSE_PIN, HOME_SENSE_PIN];

/// GPIO of ADC channel 0. Channels 1-3 follow; channel 4 is the temperature
/// sensor and has no pin.
const ADC_BASE_PIN: usize = 26;
const ADC_CHANNELS: u8 = 5;

/// System clock, for turning microseconds into busy-wait cycles.
const SYS_HZ: u32 = 132_000_000;
const STEP_PULSE_US: u32 = 10;
const STEP_PERIOD_US: u32 = 1_000;
const HAMMER_US: u32 = 3_000;

#[entry]
fn main() -> ! {
    // There's no reasonable way to recover if the peripherals are already
    // gone, so just park.
    let p = match rp2040_pac::Peripherals::take() {
        Some(p) => p,
        None => loop {
            cortex_m::asm::wfi();
        },
    };

    // GPIOs first.
    p.RESETS.reset.modify(|_, w| w.io_bank0().clear_bit().pads_bank0().clear_bit());
    while !p.RESETS.reset_done.read().io_bank0().bit() {}
    while !p.RESETS.reset_done.read().pads_bank0().bit() {}

    for pin in OUTPUT_PINS {
        p.IO_BANK0.gpio[pin as usize].gpio_ctrl.write(|w| w.funcsel().sio());
        p.SIO.gpio_oe_set.write(|w| unsafe { w.bits(1 << pin) });
    }
    // Sensors pull their lines low when they see something.
    for pin in INPUT_PINS {
        p.IO_BANK0.gpio[pin as usize].gpio_ctrl.write(|w| w.funcsel().sio());
        p.PADS_BANK0.gpio[pin as usize].modify(|_, w| w.ie().set_bit().pue().set_bit().pde().clear_bit());
    }

    // Crystal oscillator, then run the reference clock from it so that the
    // ring oscillator can be turned off.
    p.XOSC.ctrl.write(|w| unsafe { w.bits(0xfab_aa0) });
    while !p.XOSC.status.read().stable().bit() {}
    p.CLOCKS.clk_ref_ctrl.write(|w| w.src().xosc_clksrc());
    while p.CLOCKS.clk_ref_selected.read().bits() != (1 << 2) {}
    p.ROSC.ctrl.write(|w| unsafe { w.bits(0xd1e_fa4) });

    // System PLL: 12 MHz * 132 / 6 / 2 = 132 MHz.
    p.RESETS.reset.modify(|_, w| w.pll_sys().clear_bit());
    while !p.RESETS.reset_done.read().pll_sys().bit() {}
    p.PLL_SYS.cs.write(|w| unsafe { w.refdiv().bits(1) });
    p.PLL_SYS.fbdiv_int.write(|w| unsafe { w.fbdiv_int().bits(132) });
    p.PLL_SYS.pwr.write(|w| w.pd().clear_bit().vcopd().clear_bit());
    while !p.PLL_SYS.cs.read().lock().bit() {}
    p.PLL_SYS.prim.write(|w| unsafe { w.postdiv1().bits(6).postdiv2().bits(2) });
    p.PLL_SYS.pwr.modify(|_, w| w.postdivpd().clear_bit());

    // The glitchless mux has to go through aux to reach the PLL.
    p.CLOCKS.clk_sys_ctrl.write(|w| w.auxsrc().clksrc_pll_sys());
    p.CLOCKS.clk_sys_ctrl.modify(|_, w| w.src().clksrc_clk_sys_aux());
    while p.CLOCKS.clk_sys_selected.read().bits() != (1 << 1) {}

    p.CLOCKS.clk_peri_ctrl.write(|w| w.auxsrc().clk_sys().enable().set_bit());

    // USB PLL: 12 MHz * 100 / 5 / 5 = 48 MHz, shared by USB and the ADC.
    p.RESETS.reset.modify(|_, w| w.pll_usb().clear_bit());
    while !p.RESETS.reset_done.read().pll_usb().bit() {}
    p.PLL_USB.cs.write(|w| unsafe { w.refdiv().bits(1) });
    p.PLL_USB.fbdiv_int.write(|w| unsafe { w.fbdiv_int().bits(100) });
    p.PLL_USB.pwr.write(|w| w.pd().clear_bit().vcopd().clear_bit());
    while !p.PLL_USB.cs.read().lock().bit() {}
    p.PLL_USB.prim.write(|w| unsafe { w.postdiv1().bits(5).postdiv2().bits(5) });
    p.PLL_USB.pwr.modify(|_, w| w.postdivpd().clear_bit());

    p.CLOCKS.clk_usb_ctrl.write(|w| w.auxsrc().clksrc_pll_usb().enable().set_bit());
    p.CLOCKS.clk_adc_ctrl.write(|w| w.auxsrc().clksrc_pll_usb().enable().set_bit());

    // Pulse the USB controller's reset in case a debugger left it running.
    p.RESETS.reset.modify(|_, w| w.usbctrl().set_bit());
    p.RESETS.reset.modify(|_, w| w.usbctrl().clear_bit());
    while !p.RESETS.reset_done.read().usbctrl().bit() {}

    p.RESETS.reset.modify(|_, w| w.adc().clear_bit());
    while !p.RESETS.reset_done.read().adc().bit() {}
    // Analog inputs want their digital input buffers off.
    for pin in ADC_BASE_PIN..ADC_BASE_PIN + 4 {
        p.PADS_BANK0.gpio[pin].modify(|_, w| w.ie().clear_bit().od().set_bit());
    }
    p.ADC.cs.write(|w| w.en().set_bit().ts_en().set_bit());
    while !p.ADC.cs.read().ready().bit() {}

    let mut sie = Rp2040Sie::new(p.USBCTRL_REGS, p.USBCTRL_DPRAM);
    let mut usb = UsbDevice::new();
    let mechanism = Mechanism { sio: p.SIO };
    let adc = Rp2040Adc { adc: p.ADC };
    let mut embosser = Embosser::new(mechanism, adc, EmbosserConfig::default());

    loop {
        usb.attach(&mut sie);
        usb.poll(&mut sie);
        embosser.service(&mut usb, &mut sie);

        let sio = &embosser.actuator().sio;
        if usb.is_configured() {
            raise_pin(sio, LED_PIN);
        } else {
            lower_pin(sio, LED_PIN);
        }
    }
}

/// The mechanism, on GPIOs.
struct Mechanism {
    sio: rp2040_pac::SIO,
}

impl Mechanism {
    fn pulse(&self, pin: u8, count: u16) {
        for _ in 0..count {
            raise_pin(&self.sio, pin);
            delay_us(STEP_PULSE_US);
            lower_pin(&self.sio, pin);
            delay_us(STEP_PERIOD_US - STEP_PULSE_US);
        }
    }
}

impl Actuator for Mechanism {
    fn move_carriage(&mut self, steps: u16, direction: Direction) {
        match direction {
            Direction::Left => lower_pin(&self.sio, CARRIAGE_DIR_PIN),
            Direction::Right => raise_pin(&self.sio, CARRIAGE_DIR_PIN),
        }
        self.pulse(CARRIAGE_STEP_PIN, steps);
    }

    fn move_paper(&mut self, steps: u16) {
        self.pulse(PAPER_STEP_PIN, steps);
    }

    fn fire_hammer(&mut self) {
        raise_pin(&self.sio, HAMMER_PIN);
        delay_us(HAMMER_US);
        lower_pin(&self.sio, HAMMER_PIN);
    }

    fn sensor(&self, sensor: Sensor) -> bool {
        let pin = match sensor {
            Sensor::Paper => PAPER_SENSE_PIN,
            Sensor::CarriageHome => HOME_SENSE_PIN,
        };
        self.sio.gpio_in.read().bits() & (1 << pin) == 0
    }
}

/// The on-chip ADC. It converts to 12 bits; we keep the top 10.
struct Rp2040Adc {
    adc: rp2040_pac::ADC,
}

impl Adc for Rp2040Adc {
    fn read_channel(&mut self, channel: u8) -> u16 {
        if channel >= ADC_CHANNELS {
            return 0;
        }
        self.adc.cs.modify(|_, w| unsafe { w.ainsel().bits(channel).start_once().set_bit() });
        while !self.adc.cs.read().ready().bit() {}
        self.adc.result.read().result().bits() >> 2
    }
}

fn delay_us(us: u32) {
    cortex_m::asm::delay(us * (SYS_HZ / 1_000_000));
}

/// Raise the GPIO pin with index `pin`.
///
/// The pin must already be configured as an SIO output.
#[inline(always)]
fn raise_pin(sio: &rp2040_pac::SIO, pin: u8) {
    sio.gpio_out_set.write(|w| unsafe { w.bits(1 << pin) });
}

/// Lower the GPIO pin with index `pin`.
#[inline(always)]
fn lower_pin(sio: &rp2040_pac::SIO, pin: u8) {
    sio.gpio_out_clr.write(|w| unsafe { w.bits(1 << pin) });
}

// Second-stage bootloader for the board's flash chip.
cfg_if::cfg_if! {
    if #[cfg(feature = "target-feather")] {
        #[link_section = ".boot2"]
        #[used]
        static BOOT2: [u8; 256] = rp2040_boot2::BOOT_LOADER_GD25Q64CS;
    } else if #[cfg(feature = "target-pico")] {
        #[link_section = ".boot2"]
        #[used]
        static BOOT2: [u8; 256] = rp2040_boot2::BOOT_LOADER_W25Q080;
    }
}
