//! # bootcore
//!
//! Shared abstractions for the tegraboot bootloader.
//! This crate provides the error type, hardware traits and the console
//! logger that the platform, architecture and Linux loader crates build on.

#![cfg_attr(not(test), no_std)]

pub mod error;
pub mod logger;
pub mod panic;
pub mod traits;

pub use error::{Error, Result, TimingConstraint};
pub use traits::*;

/// Round `value` up to a multiple of `align`. `align` must be non-zero.
#[inline]
pub const fn round_up(value: u64, align: u64) -> u64 {
    value.div_ceil(align) * align
}

/// Round `value` down to a multiple of `align`. `align` must be non-zero.
#[inline]
pub const fn round_down(value: u64, align: u64) -> u64 {
    value - value % align
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding() {
        assert_eq!(round_up(0, 4096), 0);
        assert_eq!(round_up(1, 4096), 4096);
        assert_eq!(round_up(4096, 4096), 4096);
        assert_eq!(round_down(0x3F_FFFF, 0x20_0000), 0x20_0000);
        assert_eq!(round_down(0x40_0000, 0x20_0000), 0x40_0000);
    }
}
