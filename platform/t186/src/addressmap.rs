//! T186 physical address map.

// ============================================================================
// Display
// ============================================================================

pub const DISPLAY_BASE: usize = 0x1520_0000;
pub const DISPLAYB_BASE: usize = 0x1521_0000;
pub const DISPLAYC_BASE: usize = 0x1522_0000;

/// Display head apertures indexed by head instance.
pub const NVDISP_BASES: [usize; 3] = [DISPLAY_BASE, DISPLAYB_BASE, DISPLAYC_BASE];

// ============================================================================
// DMA
// ============================================================================

pub const GPCDMA_BASE: usize = 0x0260_0000;
pub const BPMP_DMA_BASE: usize = 0x0D23_0000;
pub const AON_DMA_BASE: usize = 0x0C2A_0000;

// ============================================================================
// Clocks, GPIO, timers
// ============================================================================

pub const CAR_BASE: usize = 0x0500_0000;
pub const GPIO_MAIN_BASE: usize = 0x0221_0000;
pub const GPIO_AON_BASE: usize = 0x0C2F_1000;
pub const TMRUS_BASE: usize = 0x0C2E_0000;

// ============================================================================
// Serial and storage
// ============================================================================

pub const UARTA_BASE: usize = 0x0310_0000;
pub const UARTB_BASE: usize = 0x0311_0000;
pub const UARTC_BASE: usize = 0x0C28_0000;

pub const SPI1_BASE: usize = 0x0321_0000;
pub const SPI2_BASE: usize = 0x0C26_0000;
pub const SPI3_BASE: usize = 0x0323_0000;
pub const SPI4_BASE: usize = 0x0324_0000;

/// SPI controllers indexed by instance - 1.
pub const SPI_BASES: [usize; 4] = [SPI1_BASE, SPI2_BASE, SPI3_BASE, SPI4_BASE];

pub const UFSHC_BASE: usize = 0x0245_0000;

// ============================================================================
// DRAM
// ============================================================================

pub const SDRAM_BASE: u64 = 0x8000_0000;
