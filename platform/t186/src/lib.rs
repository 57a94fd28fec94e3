//! # tegraboot-t186
//!
//! Board support for NVIDIA Tegra T186 (Parker): clock and reset, GPIO,
//! SPI, GPC-DMA, the UFS boot device, the NvDisplay controller and the boot
//! flow that hands over to Linux.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod addressmap;
pub mod boot;
pub mod car;
pub mod console;
pub mod fastboot;
pub mod gpcdma;
pub mod gpio;
pub mod mmio;
pub mod nvboot;
pub mod nvdisp;
pub mod odmdata;
pub mod spi;
pub mod timer;
pub mod uart;
pub mod ufs;

pub use boot::{BoardConfig, run};
