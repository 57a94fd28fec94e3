//! Clock and reset controller.
//!
//! Every module owns a register page holding its reset, clock enable and
//! clock source registers; instances of the same module follow each
//! other inside the page. PLLs live in their own pages after the modules.

use crate::mmio::MmioDerefWrapper;
use bootcore::{Error, Result, Timer, wait_for};
use tock_registers::interfaces::{ReadWriteable, Readable, Writeable};
use tock_registers::registers::ReadWrite;
use tock_registers::{register_bitfields, register_structs};

/// Oscillator feeding the PLLs.
pub const OSC_KHZ: u32 = 38_400;
/// Lowest VCO frequency the display PLLs lock at.
pub const PLL_VCO_MIN_KHZ: u32 = 800_000;
/// Largest post divider.
pub const PLL_P_MAX: u32 = 31;

const PLL_LOCK_TIMEOUT_US: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Module {
    Host1x,
    NvDisplayDisp,
    NvDisplayDsc,
    NvDisplayHub,
    NvDisplayP,
    NvDisplay0Head,
    NvDisplay0Wgrp,
    NvDisplay0Misc,
    GpcDma,
    BpmpDma,
    SpeDma,
    Spi,
    Ufs,
}

impl Module {
    const fn page(self) -> usize {
        self as usize
    }

    /// Instances a module page carries.
    pub const fn instances(self) -> u8 {
        match self {
            Module::NvDisplayP | Module::NvDisplay0Head => 3,
            Module::NvDisplay0Wgrp => 6,
            Module::Spi => 4,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockSource {
    ClkM,
    PllpOut0,
    PlldOut1,
    Plld2Out0,
    Plld3Out0,
    PllDispHub,
    NvDisplayP0Clk,
    NvDisplayP1Clk,
    NvDisplayP2Clk,
}

impl ClockSource {
    /// Pixel clock of head `instance`.
    pub fn nvdisplay_p(instance: u32) -> Result<Self> {
        match instance {
            0 => Ok(Self::NvDisplayP0Clk),
            1 => Ok(Self::NvDisplayP1Clk),
            2 => Ok(Self::NvDisplayP2Clk),
            _ => Err(Error::Invalid),
        }
    }

    const ALL: [ClockSource; 9] = [
        Self::ClkM,
        Self::PllpOut0,
        Self::PlldOut1,
        Self::Plld2Out0,
        Self::Plld3Out0,
        Self::PllDispHub,
        Self::NvDisplayP0Clk,
        Self::NvDisplayP1Clk,
        Self::NvDisplayP2Clk,
    ];

    fn from_index(idx: u32) -> Option<Self> {
        Self::ALL.get(idx as usize).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PllId {
    PllD,
    PllD2,
    PllD3,
    PllDp,
    PllDispHub,
}

impl PllId {
    const COUNT: usize = 5;
}

/// PLL dividers for a requested rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PllDividers {
    pub m: u32,
    pub n: u32,
    pub p: u32,
}

impl PllDividers {
    /// Pick dividers for `rate_khz` keeping the VCO at or above 800 MHz.
    ///
    /// The reference is fixed at OSC / 2; the smallest P that lifts the
    /// VCO into range wins.
    pub fn for_rate(rate_khz: u32) -> Result<Self> {
        if rate_khz == 0 {
            return Err(Error::Invalid);
        }
        let p = PLL_VCO_MIN_KHZ.div_ceil(rate_khz).max(1);
        if p > PLL_P_MAX {
            log::error!("{} kHz is below the PLL range", rate_khz);
            return Err(Error::NotSupported);
        }
        let m = 2;
        let cf = OSC_KHZ / m;
        let n = (rate_khz * p).div_ceil(cf);
        if n > 0xFF {
            return Err(Error::NotSupported);
        }
        Ok(Self { m, n, p })
    }

    pub const fn rate_khz(&self) -> u32 {
        OSC_KHZ / self.m * self.n / self.p
    }
}

/// Clock and reset control used by drivers.
pub trait ClockReset {
    fn rst_set(&mut self, module: Module, instance: u8) -> Result<()>;
    fn rst_clear(&mut self, module: Module, instance: u8) -> Result<()>;
    fn clk_enable(&mut self, module: Module, instance: u8) -> Result<()>;
    fn clk_disable(&mut self, module: Module, instance: u8) -> Result<()>;
    fn set_clk_src(&mut self, module: Module, instance: u8, src: ClockSource) -> Result<()>;
    /// Program the module divider; returns the rate actually reached.
    fn set_clk_rate(&mut self, module: Module, instance: u8, rate_khz: u32) -> Result<u32>;
    /// Start `pll` at `rate_khz`; returns the rate actually reached.
    fn init_pll_with_rate(&mut self, pll: PllId, rate_khz: u32) -> Result<u32>;
}

// ============================================================================
// MMIO implementation
// ============================================================================

register_bitfields! {
    u32,

    RST [
        SET OFFSET(0) NUMBITS(1) []
    ],

    CLK_OUT_ENB [
        ENB OFFSET(0) NUMBITS(1) []
    ],

    CLK_SRC [
        SRC OFFSET(24) NUMBITS(5) [],
        /// 7.1 fixed-point divider: rate = parent * 2 / (DIV + 2).
        DIV OFFSET(0) NUMBITS(8) []
    ],

    PLL_BASE [
        ENABLE OFFSET(30) NUMBITS(1) [],
        LOCK OFFSET(27) NUMBITS(1) [],
        DIVP OFFSET(19) NUMBITS(5) [],
        DIVN OFFSET(8) NUMBITS(8) [],
        DIVM OFFSET(0) NUMBITS(8) []
    ]
}

register_structs! {
    #[allow(non_snake_case)]
    pub ModuleRegs {
        (0x00 => RST: ReadWrite<u32, RST::Register>),
        (0x04 => CLK_OUT_ENB: ReadWrite<u32, CLK_OUT_ENB::Register>),
        (0x08 => CLK_SRC: ReadWrite<u32, CLK_SRC::Register>),
        (0x0c => _reserved),
        (0x10 => @END),
    }
}

register_structs! {
    #[allow(non_snake_case)]
    pub PllRegs {
        (0x00 => BASE: ReadWrite<u32, PLL_BASE::Register>),
        (0x04 => MISC: ReadWrite<u32>),
        (0x08 => @END),
    }
}

/// Bytes between module pages.
pub const MODULE_PAGE: usize = 0x1000;
/// Bytes between instances inside a page.
pub const INSTANCE_STRIDE: usize = 0x10;
/// Offset of the first PLL page.
pub const PLL_PAGES: usize = 0x10 * MODULE_PAGE;

/// The CAR block.
pub struct Car<T> {
    base: usize,
    timer: T,
    pll_rates: [u32; PllId::COUNT],
    p_rates: [u32; 3],
}

impl<T: Timer> Car<T> {
    /// # Safety
    /// `base` must be the CAR aperture.
    pub const unsafe fn new(base: usize, timer: T) -> Self {
        Self {
            base,
            timer,
            pll_rates: [0; PllId::COUNT],
            p_rates: [0; 3],
        }
    }

    fn module(&self, module: Module, instance: u8) -> Result<MmioDerefWrapper<ModuleRegs>> {
        if instance >= module.instances() {
            return Err(Error::Invalid);
        }
        let addr = self.base + module.page() * MODULE_PAGE + instance as usize * INSTANCE_STRIDE;
        // SAFETY: inside the CAR aperture given to `new`.
        Ok(unsafe { MmioDerefWrapper::new(addr) })
    }

    fn pll(&self, pll: PllId) -> MmioDerefWrapper<PllRegs> {
        // SAFETY: as above.
        unsafe { MmioDerefWrapper::new(self.base + PLL_PAGES + pll as usize * MODULE_PAGE) }
    }

    fn source_rate(&self, src: ClockSource) -> u32 {
        match src {
            ClockSource::ClkM => OSC_KHZ,
            ClockSource::PllpOut0 => 408_000,
            ClockSource::PlldOut1 => self.pll_rates[PllId::PllD as usize],
            ClockSource::Plld2Out0 => self.pll_rates[PllId::PllD2 as usize],
            ClockSource::Plld3Out0 => self.pll_rates[PllId::PllD3 as usize],
            ClockSource::PllDispHub => self.pll_rates[PllId::PllDispHub as usize],
            ClockSource::NvDisplayP0Clk => self.p_rates[0],
            ClockSource::NvDisplayP1Clk => self.p_rates[1],
            ClockSource::NvDisplayP2Clk => self.p_rates[2],
        }
    }
}

impl<T: Timer> ClockReset for Car<T> {
    fn rst_set(&mut self, module: Module, instance: u8) -> Result<()> {
        self.module(module, instance)?.RST.write(RST::SET::SET);
        Ok(())
    }

    fn rst_clear(&mut self, module: Module, instance: u8) -> Result<()> {
        self.module(module, instance)?.RST.write(RST::SET::CLEAR);
        Ok(())
    }

    fn clk_enable(&mut self, module: Module, instance: u8) -> Result<()> {
        self.module(module, instance)?.CLK_OUT_ENB.write(CLK_OUT_ENB::ENB::SET);
        Ok(())
    }

    fn clk_disable(&mut self, module: Module, instance: u8) -> Result<()> {
        self.module(module, instance)?.CLK_OUT_ENB.write(CLK_OUT_ENB::ENB::CLEAR);
        Ok(())
    }

    fn set_clk_src(&mut self, module: Module, instance: u8, src: ClockSource) -> Result<()> {
        let idx = ClockSource::ALL
            .iter()
            .position(|s| *s == src)
            .ok_or(Error::Invalid)? as u32;
        self.module(module, instance)?.CLK_SRC.modify(CLK_SRC::SRC.val(idx));
        Ok(())
    }

    fn set_clk_rate(&mut self, module: Module, instance: u8, rate_khz: u32) -> Result<u32> {
        if rate_khz == 0 {
            return Err(Error::Invalid);
        }
        let regs = self.module(module, instance)?;
        let src = ClockSource::from_index(regs.CLK_SRC.read(CLK_SRC::SRC)).ok_or(Error::Invalid)?;
        let parent = self.source_rate(src);
        if parent == 0 {
            log::error!("{:?} parent {:?} is not running", module, src);
            return Err(Error::NotInitialized);
        }

        let div = (parent * 2).div_ceil(rate_khz).saturating_sub(2).min(0xFF);
        regs.CLK_SRC.modify(CLK_SRC::DIV.val(div));
        let actual = parent * 2 / (div + 2);

        if module == Module::NvDisplayP {
            self.p_rates[instance as usize] = actual;
        }
        log::debug!("{:?}[{}]: {} kHz (asked {})", module, instance, actual, rate_khz);
        Ok(actual)
    }

    fn init_pll_with_rate(&mut self, pll: PllId, rate_khz: u32) -> Result<u32> {
        let div = PllDividers::for_rate(rate_khz)?;
        let regs = self.pll(pll);

        regs.BASE.write(
            PLL_BASE::DIVM.val(div.m) + PLL_BASE::DIVN.val(div.n) + PLL_BASE::DIVP.val(div.p),
        );
        regs.BASE.modify(PLL_BASE::ENABLE::SET);
        wait_for(&self.timer, PLL_LOCK_TIMEOUT_US, || regs.BASE.is_set(PLL_BASE::LOCK))
            .inspect_err(|_| log::error!("{:?} failed to lock", pll))?;

        let actual = div.rate_khz();
        self.pll_rates[pll as usize] = actual;
        log::debug!("{:?}: {} kHz (m {} n {} p {})", pll, actual, div.m, div.n, div.p);
        Ok(actual)
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::vec::Vec;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum CarOp {
        RstSet(Module, u8),
        RstClear(Module, u8),
        ClkEnable(Module, u8),
        ClkDisable(Module, u8),
        SetSrc(Module, u8, ClockSource),
        SetRate(Module, u8, u32),
        Pll(PllId, u32),
    }

    /// Records every request; rates are granted as asked.
    #[derive(Default)]
    pub struct RecordingCar {
        pub ops: Vec<CarOp>,
        pub fail_reset: bool,
    }

    impl ClockReset for RecordingCar {
        fn rst_set(&mut self, module: Module, instance: u8) -> Result<()> {
            if self.fail_reset {
                return Err(Error::InitFailed);
            }
            self.ops.push(CarOp::RstSet(module, instance));
            Ok(())
        }
        fn rst_clear(&mut self, module: Module, instance: u8) -> Result<()> {
            self.ops.push(CarOp::RstClear(module, instance));
            Ok(())
        }
        fn clk_enable(&mut self, module: Module, instance: u8) -> Result<()> {
            self.ops.push(CarOp::ClkEnable(module, instance));
            Ok(())
        }
        fn clk_disable(&mut self, module: Module, instance: u8) -> Result<()> {
            self.ops.push(CarOp::ClkDisable(module, instance));
            Ok(())
        }
        fn set_clk_src(&mut self, module: Module, instance: u8, src: ClockSource) -> Result<()> {
            self.ops.push(CarOp::SetSrc(module, instance, src));
            Ok(())
        }
        fn set_clk_rate(&mut self, module: Module, instance: u8, rate_khz: u32) -> Result<u32> {
            self.ops.push(CarOp::SetRate(module, instance, rate_khz));
            Ok(rate_khz)
        }
        fn init_pll_with_rate(&mut self, pll: PllId, rate_khz: u32) -> Result<u32> {
            self.ops.push(CarOp::Pll(pll, rate_khz));
            Ok(rate_khz)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mmio::fake::FakeRegs;
    use crate::timer::fake::FakeTimer;

    const CAR_SIZE: usize = PLL_PAGES + PllId::COUNT * MODULE_PAGE;

    #[test]
    fn pll_dividers_keep_vco_in_range() {
        let d = PllDividers::for_rate(148_500).unwrap();
        assert_eq!(d.p, 6);
        assert!(d.rate_khz() * d.p >= PLL_VCO_MIN_KHZ);
        assert!(d.rate_khz() >= 148_500);

        // 26 MHz is the lowest rate P can reach.
        assert_eq!(PllDividers::for_rate(26_000).unwrap().p, 31);
        assert_eq!(PllDividers::for_rate(25_000), Err(Error::NotSupported));
        assert_eq!(PllDividers::for_rate(0), Err(Error::Invalid));
    }

    #[test]
    fn reset_and_enable_bits() {
        let mem = FakeRegs::new(CAR_SIZE);
        let mut car = unsafe { Car::new(mem.base(), FakeTimer::default()) };
        let page = Module::GpcDma.page() * MODULE_PAGE;

        car.rst_set(Module::GpcDma, 0).unwrap();
        assert_eq!(mem.read(page), 1);
        car.rst_clear(Module::GpcDma, 0).unwrap();
        assert_eq!(mem.read(page), 0);
        car.clk_enable(Module::GpcDma, 0).unwrap();
        assert_eq!(mem.read(page + 4), 1);
        assert_eq!(car.rst_set(Module::GpcDma, 1), Err(Error::Invalid));
    }

    #[test]
    fn divider_follows_source() {
        let mem = FakeRegs::new(CAR_SIZE);
        let mut car = unsafe { Car::new(mem.base(), FakeTimer::default()) };
        let page = Module::NvDisplayP.page() * MODULE_PAGE + INSTANCE_STRIDE;

        car.set_clk_src(Module::NvDisplayP, 1, ClockSource::PllpOut0).unwrap();
        // 408 MHz * 2 / (DIV + 2) = 204 MHz
        assert_eq!(car.set_clk_rate(Module::NvDisplayP, 1, 204_000), Ok(204_000));
        assert_eq!(mem.read(page + 8), (1 << 24) | 2);

        // Head clocks feed the DISP module.
        car.set_clk_src(Module::NvDisplayDisp, 0, ClockSource::NvDisplayP1Clk).unwrap();
        assert_eq!(car.set_clk_rate(Module::NvDisplayDisp, 0, 204_000), Ok(204_000));

        car.set_clk_src(Module::Ufs, 0, ClockSource::Plld2Out0).unwrap();
        assert_eq!(car.set_clk_rate(Module::Ufs, 0, 1000), Err(Error::NotInitialized));
    }

    #[test]
    fn pll_waits_for_lock() {
        let mem = FakeRegs::new(CAR_SIZE);
        let mut car = unsafe { Car::new(mem.base(), FakeTimer::default()) };
        assert_eq!(car.init_pll_with_rate(PllId::PllD2, 148_500), Err(Error::Timeout));

        let pll = PLL_PAGES + PllId::PllD3 as usize * MODULE_PAGE;
        mem.write(pll, 1 << 27);
        let rate = car.init_pll_with_rate(PllId::PllD3, 148_500);
        // The write clears LOCK; the fake never sets it back.
        assert_eq!(rate, Err(Error::Timeout));
        assert_eq!(mem.read(pll) & 0xFF, 2);
        assert_ne!(mem.read(pll) & (1 << 30), 0);
    }
}
