//! Bootloader error type.
//!
//! Every driver and loader stage reports failures through [`Error`].
//! Variants describe what went wrong, not which module raised it; the
//! log record emitted at the failure site carries the module.

use thiserror::Error;

/// Result type for bootloader operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Display timing rule violated by a mode.
///
/// The numbering follows the display controller's programming guide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingConstraint {
    /// `h_ref_to_sync + h_sync_width + h_back_porch > 20`
    HorizontalBlank = 1,
    /// `v_ref_to_sync + v_sync_width + v_back_porch > 1`
    VerticalRefBlank = 2,
    /// `v_front_porch + v_sync_width + v_back_porch > 1`
    VerticalBlank = 3,
    /// `v_sync_width >= 1` and `h_sync_width >= 1`
    SyncWidth = 4,
    /// `v_ref_to_sync >= 1`
    RefToSync = 5,
    /// `v_front_porch >= v_ref_to_sync + 1` and `h_front_porch >= h_ref_to_sync + 1`
    FrontPorch = 6,
    /// `h_active >= 16` and `v_active >= 16`
    ActiveArea = 7,
}

impl TimingConstraint {
    pub const fn number(self) -> u8 {
        self as u8
    }
}

/// Bootloader error types.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("invalid argument")]
    Invalid,
    #[error("operation not supported")]
    NotSupported,
    #[error("out of memory")]
    NoMemory,
    #[error("not initialized")]
    NotInitialized,
    #[error("hardware initialization failed")]
    InitFailed,
    #[error("timed out waiting for hardware")]
    Timeout,
    #[error("invalid DMA channel")]
    InvalidChannel,
    #[error("DMA channel busy")]
    ChannelBusy,
    #[error("invalid transfer size")]
    InvalidTransferSize,
    #[error("bad parameter")]
    BadParameter,
    #[error("verification failed")]
    VerifyFailed,
    #[error("buffer overflow")]
    Overflow,
    #[error("not found")]
    NotFound,
    #[error("buffer too small")]
    BufferTooSmall,
    #[error("device tree node not found")]
    DtNodeNotFound,
    #[error("failed to add device tree node")]
    DtNodeAddFailed,
    #[error("failed to add device tree property")]
    DtPropAddFailed,
    #[error("malformed device tree blob")]
    DtInvalid,
    #[error("I/O error")]
    Io,
    #[error("timing constraint {} violated", .0.number())]
    Timing(TimingConstraint),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timing_error_names_constraint() {
        let err = Error::Timing(TimingConstraint::FrontPorch);
        assert_eq!(err.to_string(), "timing constraint 6 violated");
        assert_eq!(TimingConstraint::HorizontalBlank.number(), 1);
    }
}
