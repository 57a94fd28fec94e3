//! NvDisplay head driver.
//!
//! A head is brought up in three steps: the mode is read over EDID from
//! the sink behind the selected SOR, the display clock tree is sequenced,
//! and the head registers are programmed before the output driver (HDMI,
//! DP or DSI) is enabled. Windows are configured afterwards and scan out
//! from caller-owned framebuffers.

pub mod clock;
pub mod mode;
pub mod regs;
pub mod window;

pub use clock::{DisplayHub, HeadClock};
pub use mode::Mode;
pub use window::{Csc, PixelFormat, Surface, N_WINDOWS};

use crate::addressmap::NVDISP_BASES;
use crate::car::{ClockReset, Module};
use crate::mmio::RegisterWindow;
use alloc::boxed::Box;
use bitflags::bitflags;
use bootcore::{Error, Result, Timer};
use regs::*;
use window::{ColorPalette, WinFlags, Window};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayOutType {
    Dsi,
    Hdmi,
    Dp,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DisplayFlags: u32 {
        /// Enable the head as part of `init`.
        const ENABLED = 1 << 0;
        /// Panel refreshes on request; the tearing effect interrupt is used.
        const ONE_SHOT_MODE = 1 << 1;
        /// An earlier stage left the head running.
        const INITIALIZED_MODE = 1 << 2;
    }
}

/// Board data selecting the head and output.
#[derive(Debug, Clone, Copy)]
pub struct DisplayPdata {
    pub nvdisp_instance: u8,
    pub sor_instance: u8,
    pub flags: DisplayFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dither {
    #[default]
    Undefined,
    Disable,
    Ordered,
    Temporal,
    ErrDiff,
}

impl TryFrom<u32> for Dither {
    type Error = Error;

    fn try_from(v: u32) -> Result<Self> {
        Ok(match v {
            0 => Dither::Undefined,
            1 => Dither::Disable,
            2 => Dither::Ordered,
            3 => Dither::Temporal,
            4 => Dither::ErrDiff,
            _ => return Err(Error::NotSupported),
        })
    }
}

/// Output resource driving the panel behind a head.
pub trait OutputOps {
    fn init(&mut self, pdata: &DisplayPdata, mode: &Mode) -> Result<()>;
    fn enable(&mut self, mode: &Mode) -> Result<()>;
    fn disable(&mut self) -> Result<()>;
}

/// Where the sink's EDID is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdidBus {
    /// DP AUX channel of a SOR.
    DpAux(u8),
    I2c(u8),
}

pub trait EdidSource {
    fn get_mode(&mut self, bus: EdidBus) -> Result<Mode>;
}

/// HDMI DDC bus of SOR0.
pub const HDMI_SOR0_I2C: u8 = 6;
/// HDMI DDC bus of SOR1.
pub const HDMI_SOR1_I2C: u8 = 4;

fn edid_bus(out_type: DisplayOutType, sor: u8) -> Result<EdidBus> {
    match (out_type, sor) {
        (DisplayOutType::Dp, 0 | 1) => Ok(EdidBus::DpAux(sor)),
        (DisplayOutType::Hdmi, 0) => Ok(EdidBus::I2c(HDMI_SOR0_I2C)),
        (DisplayOutType::Hdmi, 1) => Ok(EdidBus::I2c(HDMI_SOR1_I2C)),
        (DisplayOutType::Dp | DisplayOutType::Hdmi, _) => {
            log::error!("{:?}: invalid SOR instance {}", out_type, sor);
            Err(Error::Invalid)
        }
        (DisplayOutType::Dsi, _) => {
            log::error!("display type {:?} is not supported", out_type);
            Err(Error::NotSupported)
        }
    }
}

/// Output LUT entries.
pub const CMU_LUT_SIZE: usize = 1025;

/// Output color management LUT, read by the hardware from memory.
#[repr(C, align(4096))]
pub struct Cmu {
    pub rgb: [u64; CMU_LUT_SIZE],
}

impl Cmu {
    /// Linear ramp across the upper part of the 16-bit range.
    pub fn defaults() -> Box<Self> {
        let mut cmu = Box::new(Self {
            rgb: [0; CMU_LUT_SIZE],
        });
        for (i, e) in cmu.rgb.iter_mut().enumerate() {
            let c = 0x6000 + i as u64;
            *e = (c << 32) | (c << 16) | c;
        }
        cmu
    }
}

pub struct Nvdisp<T> {
    regs: RegisterWindow,
    instance: u8,
    sor_instance: u8,
    out_type: DisplayOutType,
    mode: Mode,
    width: u32,
    height: u32,
    depth: u32,
    dither: Dither,
    flags: DisplayFlags,
    enabled: bool,
    windows: [Window; N_WINDOWS],
    palettes: [Option<Box<ColorPalette>>; N_WINDOWS],
    cmu: Option<Box<Cmu>>,
    out_ops: Option<Box<dyn OutputOps + Send>>,
    timer: T,
}

impl<T: Timer> Nvdisp<T> {
    /// Read the mode for `out_type` and set up head `pdata.nvdisp_instance`,
    /// enabling it when the board asks for it.
    pub fn init(
        out_type: DisplayOutType,
        pdata: &DisplayPdata,
        edid: &mut dyn EdidSource,
        out_ops: Option<Box<dyn OutputOps + Send>>,
        car: &mut dyn ClockReset,
        hub: &DisplayHub,
        timer: T,
    ) -> Result<Self> {
        let base = *NVDISP_BASES
            .get(pdata.nvdisp_instance as usize)
            .ok_or(Error::Invalid)?;
        // SAFETY: one of the display head apertures.
        unsafe { Self::init_at(base, out_type, pdata, edid, out_ops, car, hub, timer) }
    }

    /// # Safety
    /// `base` must be a display head aperture.
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn init_at(
        base: usize,
        out_type: DisplayOutType,
        pdata: &DisplayPdata,
        edid: &mut dyn EdidSource,
        out_ops: Option<Box<dyn OutputOps + Send>>,
        car: &mut dyn ClockReset,
        hub: &DisplayHub,
        timer: T,
    ) -> Result<Self> {
        let mode = edid.get_mode(edid_bus(out_type, pdata.sor_instance)?).inspect_err(|e| {
            log::error!("get edid failed: {}", e);
        })?;

        let mut nvdisp = Self {
            regs: unsafe { RegisterWindow::new(base) },
            instance: pdata.nvdisp_instance,
            sor_instance: pdata.sor_instance,
            out_type,
            mode,
            width: mode.h_active,
            height: mode.v_active,
            depth: 8,
            dither: Dither::Undefined,
            flags: pdata.flags,
            enabled: false,
            windows: [Window::default(); N_WINDOWS],
            palettes: Default::default(),
            cmu: None,
            out_ops,
            timer,
        };

        if let Some(ops) = nvdisp.out_ops.as_mut() {
            ops.init(pdata, &nvdisp.mode).inspect_err(|_| {
                log::debug!("failed to initialize output ops");
            })?;
        }

        if nvdisp.flags.contains(DisplayFlags::ENABLED) {
            nvdisp.enable(car, hub)?;
        }
        Ok(nvdisp)
    }

    pub fn instance(&self) -> u8 {
        self.instance
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    pub fn flags(&self) -> DisplayFlags {
        self.flags
    }

    pub fn set_depth(&mut self, depth: u32) {
        self.depth = depth;
    }

    pub fn set_dither(&mut self, dither: Dither) {
        self.dither = dither;
    }

    /// `(height, width)` of the active area.
    pub fn get_resolution(&self) -> (u32, u32) {
        (self.height, self.width)
    }

    /// Number of windows the head can scan out.
    pub fn list_windows(&self) -> usize {
        N_WINDOWS
    }

    pub fn enable(&mut self, car: &mut dyn ClockReset, hub: &DisplayHub) -> Result<()> {
        if self.out_ops.is_none() {
            log::error!("nvdisp{}: no output driver", self.instance);
            return Err(Error::Invalid);
        }

        let head = HeadClock {
            instance: self.instance,
            sor_instance: self.sor_instance,
            out_type: self.out_type,
            pclk_khz: self.mode.pclk_khz(),
        };
        clock::clk_setup(car, &self.timer, hub, &head)?;

        // Quiet while the head is reprogrammed.
        self.regs.writel(CMD_INT_MASK, 0);
        if let Err(e) = self.hw_init() {
            log::error!("nvdisp{}: hw init failed: {}", self.instance, e);
            self.regs.writel(CMD_INT_MASK, 0);
            return Err(Error::InitFailed);
        }

        if let Some(ops) = self.out_ops.as_mut() {
            ops.enable(&self.mode).inspect_err(|_| {
                log::debug!("output enable failed");
            })?;
        }

        let act = StateControl::GENERAL_ACT_REQ | StateControl::WIN_A_ACT_REQ;
        self.regs.writel(CMD_STATE_CONTROL, act.bits());
        let update = StateControl::GENERAL_UPDATE | StateControl::WIN_A_UPDATE;
        self.regs.writel(CMD_STATE_CONTROL, update.bits());

        self.flags.remove(DisplayFlags::INITIALIZED_MODE);
        self.enabled = true;
        log::info!(
            "nvdisp{}: {}x{} on {:?} (SOR{})",
            self.instance,
            self.width,
            self.height,
            self.out_type,
            self.sor_instance
        );
        Ok(())
    }

    pub fn disable(&mut self, car: &mut dyn ClockReset) -> Result<()> {
        if let Some(ops) = self.out_ops.as_mut() {
            if let Err(e) = ops.disable() {
                log::warn!("output disable failed: {}", e);
            }
        }

        self.regs.writel(CMD_INT_MASK, 0);
        for w in self.windows.iter_mut() {
            w.flags.remove(WinFlags::ENABLED);
        }
        car.clk_disable(Module::NvDisplayDisp, 0)?;
        self.enabled = false;
        Ok(())
    }

    fn hw_init(&mut self) -> Result<()> {
        let r = &self.regs;
        r.writel(CMD_STATE_ACCESS, STATE_ACCESS_ACTIVE);
        r.writel(CMD_GENERAL_INCR_SYNCPT_CNTRL, SYNCPT_CNTRL_NO_STALL);
        r.writel(CMD_INT_TYPE, HeadInt::DSC_UNDERFLOWS.bits());
        r.writel(CMD_INT_POLARITY, HeadInt::all().bits());

        let mut enable = HeadInt::FRAME_END
            | HeadInt::SD3_BUCKET_WALK_DONE
            | HeadInt::V_BLANK
            | HeadInt::HEAD_UF;
        // Tearing effect for one-shot panels.
        if self.flags.contains(DisplayFlags::ONE_SHOT_MODE) {
            enable |= HeadInt::MSF;
        }
        r.writel(CMD_INT_ENABLE, enable.bits());
        r.writel(CMD_INT_MASK, HeadInt::HEAD_UF.bits());

        r.writel(DISP_BLEND_BACKGROUND_COLOR, 0);

        self.set_color_control()?;
        let cmu = self.cmu.get_or_insert_with(Cmu::defaults);
        cmu_set(&self.regs, cmu);
        self.program_mode()
    }

    /// Program color depth and dithering.
    pub fn set_color_control(&self) -> Result<()> {
        let base = match self.depth {
            0 => BASE666,
            8 => BASE888,
            10 => BASE101010,
            12 => BASE121212,
            _ => BASE888,
        };
        let dither = match self.dither {
            Dither::Undefined | Dither::Disable => DITHER_DISABLE,
            Dither::Ordered => DITHER_ORDERED,
            Dither::Temporal => DITHER_TEMPORAL,
            Dither::ErrDiff => DITHER_ERR_ACC,
        };

        let mut val = self.regs.readl(DISP_COLOR_CONTROL);
        val = (val & !COLOR_CONTROL_BASE_COLOR_SIZE_MASK) | base;
        val = (val & !COLOR_CONTROL_DITHER_MASK) | (dither << COLOR_CONTROL_DITHER_SHIFT);
        self.regs.writel(DISP_COLOR_CONTROL, val);
        Ok(())
    }

    /// Derive the reference-to-sync offsets, validate the timings and
    /// program them.
    pub fn program_mode(&mut self) -> Result<()> {
        let m = &mut self.mode;
        log::debug!(
            "h: active {} fp {} sync {} bp {}; v: active {} fp {} sync {} bp {}",
            m.h_active,
            m.h_front_porch,
            m.h_sync_width,
            m.h_back_porch,
            m.v_active,
            m.v_front_porch,
            m.v_sync_width,
            m.v_back_porch
        );
        m.compute_h_ref_to_sync()?;
        m.compute_v_ref_to_sync()?;
        m.check_timing_constraints()?;

        let r = &self.regs;
        r.writel(DISP_REF_TO_SYNC, hv(m.h_ref_to_sync, m.v_ref_to_sync));
        r.writel(DISP_SYNC_WIDTH, hv(m.h_sync_width, m.v_sync_width));
        r.writel(DISP_BACK_PORCH, hv(m.h_back_porch, m.v_back_porch));
        r.writel(DISP_FRONT_PORCH, hv(m.h_front_porch, m.v_front_porch));
        r.writel(DISP_ACTIVE, hv(m.h_active, m.v_active));
        Ok(())
    }

    /// Attach `surf` to window `win` and program the window to scan it out
    /// unscaled at the top left corner.
    pub fn configure_window(&mut self, win: usize, surf: &Surface) -> Result<()> {
        window::check_id(win)?;

        let w = &mut self.windows[win];
        w.surf = Some(*surf);
        w.pitch = surf.pitch;
        w.x = 0;
        w.y = 0;
        w.w = surf.width;
        w.h = surf.height;

        window::csc_set(&self.regs, win, &Csc::identity());
        let cp = self.palettes[win].get_or_insert_with(ColorPalette::linear);
        window::cp_set(&self.regs, win, cp);
        window::set_owner(&self.regs, win, self.instance as u32);
        window::config(&self.regs, win, &self.windows[win], surf.pixel_format);
        self.windows[win].flags.insert(WinFlags::ENABLED);
        Ok(())
    }

    /// Point window `win` at a new framebuffer.
    pub fn win_set_surface(&mut self, win: usize, addr: u64) -> Result<()> {
        window::check_id(win)?;
        if !self.windows[win].flags.contains(WinFlags::ENABLED) {
            log::error!("window {} is not configured", win);
            return Err(Error::NotInitialized);
        }
        window::set_buf(&self.regs, win, addr);
        Ok(())
    }
}

fn cmu_set(regs: &RegisterWindow, cmu: &Cmu) {
    let addr = cmu as *const Cmu as u64;
    arch_aarch64::cache::clean_dcache_range(addr as usize, core::mem::size_of::<Cmu>());
    regs.writel(CORE_OUTPUT_LUT_BASE, addr as u32);
    regs.writel(CORE_OUTPUT_LUT_BASE_HI, (addr >> 32) as u32);
    regs.writel(
        CORE_OUTPUT_LUT_CONTROL,
        OUTPUT_LUT_SIZE_1025 | OUTPUT_LUT_MODE_INTERPOLATE,
    );
    let cc = regs.readl(DISP_COLOR_CONTROL);
    regs.writel(DISP_COLOR_CONTROL, cc | COLOR_CONTROL_CMU_ENABLE);
}
