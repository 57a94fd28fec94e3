//! Display head registers, as 32-bit word indices into the head aperture.

use bitflags::bitflags;

// ============================================================================
// Command block
// ============================================================================

pub const CMD_GENERAL_INCR_SYNCPT_CNTRL: usize = 0x001;
pub const CMD_INT_STATUS: usize = 0x037;
pub const CMD_INT_MASK: usize = 0x038;
pub const CMD_INT_ENABLE: usize = 0x039;
pub const CMD_INT_TYPE: usize = 0x03a;
pub const CMD_INT_POLARITY: usize = 0x03b;
pub const CMD_STATE_ACCESS: usize = 0x040;
pub const CMD_STATE_CONTROL: usize = 0x041;
/// Selects the window the window registers refer to.
pub const CMD_DISPLAY_WINDOW_HEADER: usize = 0x042;

pub const SYNCPT_CNTRL_NO_STALL: u32 = 1 << 8;

/// Read and write the active copy of the registers.
pub const STATE_ACCESS_ACTIVE: u32 = (1 << 0) | (1 << 2);

pub const WINDOW_HEADER_SELECT_SHIFT: u32 = 4;

bitflags! {
    /// Head interrupt sources, shared by the type, polarity, enable and
    /// mask registers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HeadInt: u32 {
        const FRAME_END = 1 << 1;
        const V_BLANK = 1 << 2;
        const REGION_CRC = 1 << 6;
        const REG_TMOUT = 1 << 7;
        const V_PULSE2 = 1 << 12;
        const V_PULSE3 = 1 << 13;
        const MSF = 1 << 16;
        const HEAD_UF = 1 << 18;
        const SD3_BUCKET_WALK_DONE = 1 << 24;
        const DSC_OBUF_UF = 1 << 26;
        const DSC_RBUF_UF = 1 << 27;
        const DSC_BBUF_UF = 1 << 28;
        const DSC_TO_UF = 1 << 29;
    }
}

impl HeadInt {
    /// DSC underflows are level interrupts.
    pub const DSC_UNDERFLOWS: Self = Self::DSC_TO_UF
        .union(Self::DSC_BBUF_UF)
        .union(Self::DSC_RBUF_UF)
        .union(Self::DSC_OBUF_UF);
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StateControl: u32 {
        const GENERAL_ACT_REQ = 1 << 0;
        const WIN_A_ACT_REQ = 1 << 1;
        const GENERAL_UPDATE = 1 << 8;
        const WIN_A_UPDATE = 1 << 9;
    }
}

impl StateControl {
    pub fn win_act_req(win: u32) -> Self {
        Self::from_bits_retain(Self::WIN_A_ACT_REQ.bits() << win)
    }

    pub fn win_update(win: u32) -> Self {
        Self::from_bits_retain(Self::WIN_A_UPDATE.bits() << win)
    }
}

// ============================================================================
// Head timing and output
// ============================================================================

pub const DISP_REF_TO_SYNC: usize = 0x1006;
pub const DISP_SYNC_WIDTH: usize = 0x1007;
pub const DISP_BACK_PORCH: usize = 0x1008;
pub const DISP_ACTIVE: usize = 0x1009;
pub const DISP_FRONT_PORCH: usize = 0x100a;
pub const DISP_COLOR_CONTROL: usize = 0x1013;
pub const DISP_BLEND_BACKGROUND_COLOR: usize = 0x10e4;

/// Pack a horizontal/vertical pair the way every timing register holds it.
pub const fn hv(h: u32, v: u32) -> u32 {
    (h & 0x7fff) | ((v & 0x7fff) << 16)
}

pub const COLOR_CONTROL_BASE_COLOR_SIZE_MASK: u32 = 0xf;
pub const BASE666: u32 = 0;
pub const BASE888: u32 = 8;
pub const BASE101010: u32 = 10;
pub const BASE121212: u32 = 12;

pub const COLOR_CONTROL_DITHER_SHIFT: u32 = 8;
pub const COLOR_CONTROL_DITHER_MASK: u32 = 0x7 << COLOR_CONTROL_DITHER_SHIFT;
pub const DITHER_DISABLE: u32 = 0;
pub const DITHER_ORDERED: u32 = 2;
pub const DITHER_ERR_ACC: u32 = 3;
pub const DITHER_TEMPORAL: u32 = 4;

pub const COLOR_CONTROL_CMU_ENABLE: u32 = 1 << 20;

// ============================================================================
// Output LUT (CMU)
// ============================================================================

pub const CORE_OUTPUT_LUT_CONTROL: usize = 0x1431;
pub const CORE_OUTPUT_LUT_BASE: usize = 0x1432;
pub const CORE_OUTPUT_LUT_BASE_HI: usize = 0x1433;

/// 1025 entry LUT, interpolated.
pub const OUTPUT_LUT_SIZE_1025: u32 = 2;
pub const OUTPUT_LUT_MODE_INTERPOLATE: u32 = 1 << 4;

// ============================================================================
// Window registers (through the window header)
// ============================================================================

pub const WIN_SET_OWNER: usize = 0x601;
pub const WIN_INPUT_LUT_CONTROL: usize = 0x602;
pub const WIN_INPUT_LUT_BASE: usize = 0x603;
pub const WIN_INPUT_LUT_BASE_HI: usize = 0x604;
/// First of the twelve 3x4 color space conversion coefficients.
pub const WIN_CSC_KRR: usize = 0x611;

pub const WIN_OPTIONS: usize = 0x700;
pub const WIN_COLOR_DEPTH: usize = 0x703;
pub const WIN_POSITION: usize = 0x704;
pub const WIN_SIZE: usize = 0x705;
pub const WIN_CROPPED_SIZE_IN: usize = 0x706;
pub const WIN_LINE_STRIDE: usize = 0x70a;

pub const WINBUF_START_ADDR: usize = 0x800;
pub const WINBUF_START_ADDR_HI: usize = 0x80d;

pub const WIN_OPTIONS_ENABLE: u32 = 1 << 30;
pub const WIN_INPUT_LUT_ENABLE: u32 = 1 << 0;
pub const WIN_INPUT_LUT_SIZE_257: u32 = 1 << 1;
