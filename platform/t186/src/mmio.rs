//! Memory-mapped register access.
//!
//! Register blocks with a fixed layout are described with `tock-registers`
//! and reached through [`MmioDerefWrapper`]. Sparse blocks addressed by
//! word index (the display heads) go through [`RegisterWindow`].

use core::marker::PhantomData;
use core::ops;
use core::ptr::{read_volatile, write_volatile};

/// Typed view of a register block at a fixed address.
pub struct MmioDerefWrapper<T> {
    start_addr: usize,
    phantom: PhantomData<fn() -> T>,
}

impl<T> MmioDerefWrapper<T> {
    /// # Safety
    /// `start_addr` must point at a live register block laid out as `T`.
    pub const unsafe fn new(start_addr: usize) -> Self {
        Self {
            start_addr,
            phantom: PhantomData,
        }
    }

    pub const fn addr(&self) -> usize {
        self.start_addr
    }
}

impl<T> ops::Deref for MmioDerefWrapper<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // SAFETY: guaranteed by the caller of `new`.
        unsafe { &*(self.start_addr as *const _) }
    }
}

/// Register aperture addressed by 32-bit word index.
#[derive(Debug, Clone, Copy)]
pub struct RegisterWindow {
    base: usize,
}

impl RegisterWindow {
    /// # Safety
    /// `base` must point at a live register aperture covering every index
    /// later passed to [`readl`](Self::readl) or [`writel`](Self::writel).
    pub const unsafe fn new(base: usize) -> Self {
        Self { base }
    }

    pub const fn base(&self) -> usize {
        self.base
    }

    #[inline(always)]
    pub fn readl(&self, reg: usize) -> u32 {
        // SAFETY: guaranteed by the caller of `new`.
        unsafe { read_volatile((self.base + reg * 4) as *const u32) }
    }

    #[inline(always)]
    pub fn writel(&self, reg: usize, value: u32) {
        // SAFETY: guaranteed by the caller of `new`.
        unsafe { write_volatile((self.base + reg * 4) as *mut u32, value) }
    }
}

/// Word-aligned host memory standing in for a register aperture.
#[cfg(test)]
pub(crate) mod fake {
    use std::vec;
    use std::vec::Vec;

    pub struct FakeRegs {
        _mem: Vec<u64>,
        base: usize,
    }

    impl FakeRegs {
        pub fn new(bytes: usize) -> Self {
            let mut mem = vec![0u64; bytes.div_ceil(8)];
            let base = mem.as_mut_ptr() as usize;
            Self { _mem: mem, base }
        }

        pub fn base(&self) -> usize {
            self.base
        }

        pub fn read(&self, offset: usize) -> u32 {
            // SAFETY: in bounds of the buffer, u32 aligned.
            unsafe { core::ptr::read_volatile((self.base() + offset) as *const u32) }
        }

        pub fn write(&self, offset: usize, value: u32) {
            // SAFETY: as above.
            unsafe { core::ptr::write_volatile((self.base() + offset) as *mut u32, value) }
        }
    }
}
