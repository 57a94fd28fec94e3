//! Linux hand-off for tegraboot.
//!
//! Parses Android boot images, stages kernel and ramdisk at their load
//! addresses and patches the kernel device tree before the jump.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod bootimg;
pub mod cmdline;
pub mod config;
pub mod dtb;
pub mod dtb_update;
pub mod loader;

pub use config::LoaderConfig;
pub use dtb::DeviceTree;
pub use dtb_update::{LinuxBootHelper, MemBlock};
pub use loader::{BinaryLoader, BinaryType, KernelBin, KernelLoader, LinuxImage, PhysMemory};
