//! Exception handling for AArch64.
//!
//! The bootloader never expects an exception. Every vector records the
//! syndrome registers, logs them and parks the core, so a stray abort in a
//! driver shows up on the console instead of as a silent hang.

/// Syndrome state captured when an exception is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionContext {
    /// Exception Link Register.
    pub elr: u64,
    /// Saved Program Status Register.
    pub spsr: u64,
    /// Exception Syndrome Register.
    pub esr: u64,
    /// Fault Address Register.
    pub far: u64,
}

/// Exception class decoded from ESR_ELx.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExceptionClass {
    Unknown = 0x00,
    WfxTrap = 0x01,
    IllegalExecution = 0x0E,
    Svc64 = 0x15,
    Smc64 = 0x17,
    SysTrap = 0x18,
    InstrAbortLower = 0x20,
    InstrAbortSame = 0x21,
    PcAlign = 0x22,
    DataAbortLower = 0x24,
    DataAbortSame = 0x25,
    SpAlign = 0x26,
    SError = 0x2F,
    Brk64 = 0x3C,
}

impl From<u64> for ExceptionClass {
    fn from(esr: u64) -> Self {
        let ec = ((esr >> 26) & 0x3F) as u8;
        match ec {
            0x01 => Self::WfxTrap,
            0x0E => Self::IllegalExecution,
            0x15 => Self::Svc64,
            0x17 => Self::Smc64,
            0x18 => Self::SysTrap,
            0x20 => Self::InstrAbortLower,
            0x21 => Self::InstrAbortSame,
            0x22 => Self::PcAlign,
            0x24 => Self::DataAbortLower,
            0x25 => Self::DataAbortSame,
            0x26 => Self::SpAlign,
            0x2F => Self::SError,
            0x3C => Self::Brk64,
            _ => Self::Unknown,
        }
    }
}

impl ExceptionContext {
    pub fn class(&self) -> ExceptionClass {
        ExceptionClass::from(self.esr)
    }

    /// Whether FAR holds a valid fault address for this class.
    pub fn has_fault_address(&self) -> bool {
        matches!(
            self.class(),
            ExceptionClass::DataAbortLower
                | ExceptionClass::DataAbortSame
                | ExceptionClass::InstrAbortLower
                | ExceptionClass::InstrAbortSame
                | ExceptionClass::PcAlign
        )
    }

    pub fn log(&self, kind: &str) {
        log::error!(
            "{} exception: {:?} esr={:#x} elr={:#x} spsr={:#x}",
            kind,
            self.class(),
            self.esr,
            self.elr,
            self.spsr
        );
        if self.has_fault_address() {
            log::error!("fault address {:#x}", self.far);
        }
    }
}

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
mod vectors {
    use super::ExceptionContext;
    use core::arch::global_asm;

    /// Install the exception vector table.
    ///
    /// # Safety
    /// Must be called from EL1 with the vector table linked in.
    #[inline]
    pub unsafe fn install_vector_table() {
        unsafe extern "C" {
            static __exception_vectors: u8;
        }

        unsafe {
            let vectors = &raw const __exception_vectors as u64;
            core::arch::asm!(
                "msr vbar_el1, {}",
                "isb",
                in(reg) vectors,
                options(nostack)
            );
        }
    }

    fn capture() -> ExceptionContext {
        let (elr, spsr, esr, far): (u64, u64, u64, u64);
        unsafe {
            core::arch::asm!(
                "mrs {0}, elr_el1",
                "mrs {1}, spsr_el1",
                "mrs {2}, esr_el1",
                "mrs {3}, far_el1",
                out(reg) elr,
                out(reg) spsr,
                out(reg) esr,
                out(reg) far,
                options(nomem, nostack)
            );
        }
        ExceptionContext { elr, spsr, esr, far }
    }

    #[unsafe(no_mangle)]
    extern "C" fn exception_sync() -> ! {
        capture().log("synchronous");
        bootcore::panic::halt_loop()
    }

    #[unsafe(no_mangle)]
    extern "C" fn exception_async() -> ! {
        capture().log("asynchronous");
        bootcore::panic::halt_loop()
    }

    // Exception vector table.
    // Each entry is 128 bytes (0x80), containing up to 32 instructions.
    global_asm!(
        r#"
.section .text.vectors
.balign 0x800
.global __exception_vectors
__exception_vectors:

// Current EL with SP0
.balign 0x80
    b       exception_sync
.balign 0x80
    b       exception_async
.balign 0x80
    b       exception_async
.balign 0x80
    b       exception_async

// Current EL with SPx
.balign 0x80
    b       exception_sync
.balign 0x80
    b       exception_async
.balign 0x80
    b       exception_async
.balign 0x80
    b       exception_async

// Lower EL using AArch64
.balign 0x80
    b       exception_sync
.balign 0x80
    b       exception_async
.balign 0x80
    b       exception_async
.balign 0x80
    b       exception_async

// Lower EL using AArch32
.balign 0x80
    b       exception_sync
.balign 0x80
    b       exception_async
.balign 0x80
    b       exception_async
.balign 0x80
    b       exception_async
"#
    );
}

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
pub use vectors::install_vector_table;

/// Host builds have no vector table.
///
/// # Safety
/// Always safe off-target; the signature matches the firmware build.
#[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
pub unsafe fn install_vector_table() {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_exception_class() {
        assert_eq!(ExceptionClass::from(0x25u64 << 26), ExceptionClass::DataAbortSame);
        assert_eq!(ExceptionClass::from(0x17u64 << 26), ExceptionClass::Smc64);
        assert_eq!(ExceptionClass::from(0x3Fu64 << 26), ExceptionClass::Unknown);
    }

    #[test]
    fn fault_address_only_for_aborts() {
        let ctx = ExceptionContext { elr: 0, spsr: 0, esr: 0x24 << 26, far: 0x1000 };
        assert!(ctx.has_fault_address());
        let ctx = ExceptionContext { esr: 0x15 << 26, ..ctx };
        assert!(!ctx.has_fault_address());
    }
}
