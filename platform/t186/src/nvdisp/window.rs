//! Window (plane) programming.
//!
//! Window registers are banked: the head's window header selects which
//! window subsequent window register accesses reach.

use super::regs::*;
use crate::mmio::RegisterWindow;
use alloc::boxed::Box;
use bitflags::bitflags;
use bootcore::{Error, Result};

/// Windows a head can own.
pub const N_WINDOWS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    R5G6B5 = 6,
    A8R8G8B8 = 12,
    A8B8G8R8 = 13,
}

impl PixelFormat {
    pub const fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelFormat::R5G6B5 => 2,
            PixelFormat::A8R8G8B8 | PixelFormat::A8B8G8R8 => 4,
        }
    }
}

/// Framebuffer scanned out by a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Surface {
    pub width: u32,
    pub height: u32,
    /// Bytes per line.
    pub pitch: u32,
    pub pixel_format: PixelFormat,
    pub base: u64,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct WinFlags: u32 {
        const ENABLED = 1 << 0;
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Window {
    pub flags: WinFlags,
    pub surf: Option<Surface>,
    pub pitch: u32,
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

/// 3x4 color space conversion matrix in S15.16 fixed point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Csc {
    pub coeff: [u32; 12],
}

impl Csc {
    pub const UNITY: u32 = 0x10000;

    pub const fn identity() -> Self {
        let mut coeff = [0; 12];
        coeff[0] = Self::UNITY;
        coeff[5] = Self::UNITY;
        coeff[10] = Self::UNITY;
        Self { coeff }
    }
}

/// Input LUT entries.
pub const CP_LUT_SIZE: usize = 257;

/// Per-window input color palette, read by the hardware from memory.
#[repr(C, align(4096))]
pub struct ColorPalette {
    pub rgb: [u64; CP_LUT_SIZE],
}

impl ColorPalette {
    /// Linear ramp over the 16-bit component range.
    pub fn linear() -> Box<Self> {
        let mut cp = Box::new(Self {
            rgb: [0; CP_LUT_SIZE],
        });
        for (i, e) in cp.rgb.iter_mut().enumerate() {
            let c = ((i as u64) << 8).min(0xffff);
            *e = (c << 32) | (c << 16) | c;
        }
        cp
    }
}

pub(super) fn select(regs: &RegisterWindow, win: usize) {
    regs.writel(CMD_DISPLAY_WINDOW_HEADER, 1 << (WINDOW_HEADER_SELECT_SHIFT as usize + win));
}

pub(super) fn check_id(win: usize) -> Result<()> {
    if win >= N_WINDOWS {
        log::error!("window {} does not exist", win);
        return Err(Error::Invalid);
    }
    Ok(())
}

pub(super) fn csc_set(regs: &RegisterWindow, win: usize, csc: &Csc) {
    select(regs, win);
    for (i, c) in csc.coeff.iter().enumerate() {
        regs.writel(WIN_CSC_KRR + i, *c);
    }
}

pub(super) fn cp_set(regs: &RegisterWindow, win: usize, cp: &ColorPalette) {
    let addr = cp as *const ColorPalette as u64;
    arch_aarch64::cache::clean_dcache_range(addr as usize, core::mem::size_of::<ColorPalette>());
    select(regs, win);
    regs.writel(WIN_INPUT_LUT_BASE, addr as u32);
    regs.writel(WIN_INPUT_LUT_BASE_HI, (addr >> 32) as u32);
    regs.writel(WIN_INPUT_LUT_CONTROL, WIN_INPUT_LUT_ENABLE | WIN_INPUT_LUT_SIZE_257);
}

pub(super) fn set_owner(regs: &RegisterWindow, win: usize, head: u32) {
    select(regs, win);
    regs.writel(WIN_SET_OWNER, head & 0xf);
}

pub(super) fn config(regs: &RegisterWindow, win: usize, w: &Window, format: PixelFormat) {
    select(regs, win);
    regs.writel(WIN_COLOR_DEPTH, format as u32);
    regs.writel(WIN_POSITION, hv(w.x, w.y));
    regs.writel(WIN_SIZE, hv(w.w, w.h));
    regs.writel(WIN_CROPPED_SIZE_IN, hv(w.w, w.h));
    regs.writel(WIN_LINE_STRIDE, w.pitch);
    regs.writel(WIN_OPTIONS, WIN_OPTIONS_ENABLE);
}

pub(super) fn set_buf(regs: &RegisterWindow, win: usize, addr: u64) {
    select(regs, win);
    regs.writel(WINBUF_START_ADDR, addr as u32);
    regs.writel(WINBUF_START_ADDR_HI, (addr >> 32) as u32);
    regs.writel(CMD_STATE_CONTROL, StateControl::win_act_req(win as u32).bits());
    regs.writel(CMD_STATE_CONTROL, StateControl::win_update(win as u32).bits());
}
