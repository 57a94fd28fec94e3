//! Display clock tree.
//!
//! The hub, host1x, window groups, misc and DSC blocks are shared by all
//! heads and only sequenced by the first head brought up; later heads only
//! program their own pixel clock and head reset.

use super::DisplayOutType;
use crate::car::{ClockReset, ClockSource, Module, PllId};
use bootcore::{Result, Timer};
use core::sync::atomic::{AtomicBool, Ordering};

pub const DP_CLK_KHZ: u32 = 270_000;
pub const DISPHUB_CLK_KHZ: u32 = 408_000;
/// Head 0 pixel clock when another head drives the panel.
pub const DEFAULT_P0_CLK_KHZ: u32 = 193_333;
/// Below this the PLL runs at twice the pixel clock.
pub const MIN_PLL_PCLK_KHZ: u32 = 27_000;

/// Window groups reset alongside the hub.
pub const N_WINDOWS: u8 = 6;

const SETTLE_US: u64 = 5;

/// Shared display hub state.
pub struct DisplayHub {
    initialized: AtomicBool,
}

impl DisplayHub {
    pub const fn new() -> Self {
        Self {
            initialized: AtomicBool::new(false),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }
}

impl Default for DisplayHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Head being clocked.
#[derive(Debug, Clone, Copy)]
pub struct HeadClock {
    pub instance: u8,
    pub sor_instance: u8,
    pub out_type: DisplayOutType,
    pub pclk_khz: u32,
}

/// Reset, source, rate, enable, release: the order every display clock
/// is brought up in.
fn bring_up(
    car: &mut dyn ClockReset,
    timer: &dyn Timer,
    module: Module,
    instance: u8,
    src: ClockSource,
    rate_khz: Option<u32>,
) -> Result<()> {
    car.rst_set(module, instance)?;
    car.set_clk_src(module, instance, src)?;
    if let Some(rate) = rate_khz {
        let actual = car.set_clk_rate(module, instance, rate)?;
        log::debug!("{:?}[{}] at {} kHz", module, instance, actual);
    }
    timer.delay_us(SETTLE_US);
    car.clk_enable(module, instance)?;
    car.rst_clear(module, instance)?;
    timer.delay_us(SETTLE_US);
    Ok(())
}

/// Program the clocks and resets feeding head `head`.
pub fn clk_setup(
    car: &mut dyn ClockReset,
    timer: &dyn Timer,
    hub: &DisplayHub,
    head: &HeadClock,
) -> Result<()> {
    let first = !hub.is_initialized();
    let pclk = head.pclk_khz;
    let mut src_rate = pclk;

    log::debug!("configuring {:?} on SOR{}", head.out_type, head.sor_instance);

    // PLLDx cannot go below 26 MHz.
    if src_rate < MIN_PLL_PCLK_KHZ {
        log::debug!("pll rate {} kHz doubled to {} kHz", src_rate, src_rate * 2);
        src_rate *= 2;
    }

    let mut p12_src = None;
    match head.sor_instance {
        0 => {
            car.init_pll_with_rate(PllId::PllD3, src_rate)?;
            p12_src = Some(ClockSource::Plld3Out0);
        }
        1 => {
            car.init_pll_with_rate(PllId::PllD2, src_rate)?;
            p12_src = Some(ClockSource::Plld2Out0);
        }
        _ => {}
    }

    if head.out_type == DisplayOutType::Dp {
        car.init_pll_with_rate(PllId::PllDp, DP_CLK_KHZ)?;
    }

    let (p0_src, p0_clk) = match (head.instance, p12_src) {
        (0, Some(src)) => (src, pclk),
        _ => (ClockSource::PlldOut1, DEFAULT_P0_CLK_KHZ),
    };
    if p0_src == ClockSource::PlldOut1 || p12_src.is_none() {
        car.init_pll_with_rate(PllId::PllD, DEFAULT_P0_CLK_KHZ)?;
    }

    if first {
        car.init_pll_with_rate(PllId::PllDispHub, DISPHUB_CLK_KHZ)?;

        car.rst_set(Module::Host1x, 0)?;
        car.set_clk_src(Module::Host1x, 0, ClockSource::PllpOut0)?;
        timer.delay_us(SETTLE_US);
        car.clk_enable(Module::Host1x, 0)?;
        car.rst_clear(Module::Host1x, 0)?;
        timer.delay_us(SETTLE_US);

        car.rst_set(Module::NvDisplay0Head, 0)?;
    }
    car.rst_set(Module::NvDisplay0Head, head.instance)?;

    if first {
        for w in 0..N_WINDOWS {
            car.rst_set(Module::NvDisplay0Wgrp, w)?;
        }
        car.rst_set(Module::NvDisplay0Misc, 0)?;
    }

    bring_up(car, timer, Module::NvDisplayP, 0, p0_src, Some(p0_clk))?;
    if head.instance != 0 {
        let src = p12_src.unwrap_or(ClockSource::PlldOut1);
        bring_up(car, timer, Module::NvDisplayP, head.instance, src, Some(pclk))?;
    }

    if first {
        bring_up(car, timer, Module::NvDisplayHub, 0, ClockSource::PllDispHub, None)?;
    }

    let disp_src = ClockSource::nvdisplay_p(head.instance as u32)?;
    bring_up(car, timer, Module::NvDisplayDisp, 0, disp_src, Some(pclk))?;

    if first {
        bring_up(car, timer, Module::NvDisplayDsc, 0, ClockSource::NvDisplayP0Clk, None)?;
        for w in 0..N_WINDOWS {
            car.rst_clear(Module::NvDisplay0Wgrp, w)?;
        }
        car.rst_clear(Module::NvDisplay0Misc, 0)?;
        car.rst_clear(Module::NvDisplay0Head, 0)?;
    }
    car.rst_clear(Module::NvDisplay0Head, head.instance)?;

    hub.initialized.store(true, Ordering::Release);
    Ok(())
}
