//! AArch64 architecture support.
//!
//! Provides the entry point, exception vectors, cache maintenance, secure
//! monitor calls and the kernel hand-off for the Tegra T186 CPU complex.
//!
//! Instructions are only emitted for bare-metal AArch64 builds; host builds
//! get inert fallbacks so the drivers above can be unit tested.

#![cfg_attr(not(test), no_std)]

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
macro_rules! on_target {
    ($($body:tt)*) => { unsafe { core::arch::asm!($($body)*) } };
}

#[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
macro_rules! on_target {
    ($($body:tt)*) => {};
}

pub(crate) use on_target;

pub mod cache;
pub mod cpu;
pub mod exceptions;
pub mod linux;
pub mod smc;

// Entry point assembly.
// MB1/MB2 jump to the start of the image at EL1 with MMU and caches off.
// We set up the stack and call into Rust.
// Only included when "default-entry" feature is enabled.
#[cfg(all(feature = "default-entry", target_arch = "aarch64", target_os = "none"))]
core::arch::global_asm!(
    r#"
.section .text._start
.global _start

_start:
    // Park all cores except core 0
    mrs     x0, mpidr_el1
    and     x0, x0, #0xFF
    cbz     x0, .Lprimary_core

.Lpark:
    wfe
    b       .Lpark

.Lprimary_core:
    ldr     x0, =_stack_top
    mov     sp, x0

    // Clear BSS
    ldr     x0, =__bss_start
    ldr     x1, =__bss_end
.Lclear_bss:
    cmp     x0, x1
    b.ge    .Lbss_done
    str     xzr, [x0], #8
    b       .Lclear_bss
.Lbss_done:

    bl      boot_main

.Lhalt:
    wfe
    b       .Lhalt
"#
);

/// Get the current exception level (0-3).
#[inline]
pub fn current_el() -> u8 {
    #[allow(unused_mut)]
    let mut el: u64 = 1 << 2;
    on_target!("mrs {}, CurrentEL", out(reg) el, options(nomem, nostack));
    ((el >> 2) & 0x3) as u8
}

/// Get the current core ID.
#[inline]
pub fn core_id() -> u8 {
    #[allow(unused_mut)]
    let mut mpidr: u64 = 0;
    on_target!("mrs {}, mpidr_el1", out(reg) mpidr, options(nomem, nostack));
    (mpidr & 0xFF) as u8
}

/// Memory barrier - ensure all previous memory accesses complete.
#[inline]
pub fn dmb() {
    on_target!("dmb sy", options(nostack));
    core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
}

/// Data synchronization barrier.
#[inline]
pub fn dsb() {
    on_target!("dsb sy", options(nostack));
    core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
}

/// Instruction synchronization barrier.
#[inline]
pub fn isb() {
    on_target!("isb", options(nostack));
}

/// Wait for interrupt (low power idle).
#[inline]
pub fn wfi() {
    on_target!("wfi", options(nomem, nostack));
}

/// Wait for event (low power idle).
#[inline]
pub fn wfe() {
    on_target!("wfe", options(nomem, nostack));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_fallbacks_are_inert() {
        assert_eq!(current_el(), 1);
        assert_eq!(core_id(), 0);
        dmb();
        dsb();
        isb();
    }
}
