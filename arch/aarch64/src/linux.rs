//! Hand-off to an AArch64 Linux kernel.
//!
//! The arm64 boot protocol wants `x0` = physical address of the DTB,
//! `x1..x3` = 0, MMU off and the kernel image and DTB cleaned to the point
//! of coherency.

use crate::cache;

/// Image and DTB locations for the jump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinuxEntry {
    pub kernel: usize,
    pub kernel_size: usize,
    pub dtb: usize,
    pub dtb_size: usize,
}

/// Clean caches and branch to the kernel. Never returns.
///
/// # Safety
/// `entry.kernel` must hold a valid arm64 Image and `entry.dtb` a valid
/// flattened device tree; nothing of the bootloader survives the jump.
pub unsafe fn boot_linux(entry: LinuxEntry) -> ! {
    log::info!("jumping to kernel at {:#x}, dtb at {:#x}", entry.kernel, entry.dtb);

    cache::clean_dcache_range(entry.kernel, entry.kernel_size);
    cache::clean_dcache_range(entry.dtb, entry.dtb_size);
    crate::isb();

    #[cfg(all(target_arch = "aarch64", target_os = "none"))]
    unsafe {
        core::arch::asm!(
            "mov x1, xzr",
            "mov x2, xzr",
            "mov x3, xzr",
            "br x4",
            in("x0") entry.dtb,
            in("x4") entry.kernel,
            options(noreturn)
        );
    }

    #[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
    bootcore::panic::halt_loop()
}
