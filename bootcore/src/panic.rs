//! Panic handling utilities.
//!
//! The firmware binary defines the panic handler; it reports through
//! [`report`] and parks the core with [`halt_loop`].

/// Panic information that can be captured without allocations.
#[derive(Clone, Copy)]
pub struct PanicInfo<'a> {
    pub message: Option<&'a str>,
    pub file: Option<&'a str>,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

impl<'a> PanicInfo<'a> {
    /// Extract info from core::panic::PanicInfo.
    pub fn from_core(info: &'a core::panic::PanicInfo<'a>) -> Self {
        let location = info.location();

        Self {
            message: info.message().as_str(),
            file: location.map(|l| l.file()),
            line: location.map(|l| l.line()),
            column: location.map(|l| l.column()),
        }
    }
}

/// Log a panic at error level.
pub fn report(info: &core::panic::PanicInfo<'_>) {
    let captured = PanicInfo::from_core(info);
    match (captured.file, captured.line) {
        (Some(file), Some(line)) => {
            log::error!("panic at {}:{}: {}", file, line, info.message())
        }
        _ => log::error!("panic: {}", info.message()),
    }
}

/// Infinite loop for panic situations.
/// Uses architecture-specific halt instructions when possible.
#[inline(always)]
pub fn halt_loop() -> ! {
    loop {
        #[cfg(target_arch = "aarch64")]
        unsafe {
            core::arch::asm!("wfe", options(nomem, nostack));
        }

        #[cfg(not(target_arch = "aarch64"))]
        core::hint::spin_loop();
    }
}
