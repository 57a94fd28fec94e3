//! TMRUS microsecond counter.
//!
//! A free-running 32-bit counter ticking at 1 MHz, available from reset.

use crate::mmio::MmioDerefWrapper;
use bootcore::Timer;
use tock_registers::interfaces::Readable;
use tock_registers::register_structs;
use tock_registers::registers::{ReadOnly, ReadWrite};

register_structs! {
    #[allow(non_snake_case)]
    pub TimerUsRegs {
        (0x00 => CNTR_1US: ReadOnly<u32>),
        (0x04 => USEC_CFG: ReadWrite<u32>),
        (0x08 => @END),
    }
}

pub struct TimerUs {
    regs: MmioDerefWrapper<TimerUsRegs>,
}

impl TimerUs {
    /// # Safety
    /// `base` must be the TMRUS aperture.
    pub const unsafe fn new(base: usize) -> Self {
        Self {
            regs: unsafe { MmioDerefWrapper::new(base) },
        }
    }

    fn now(&self) -> u32 {
        self.regs.CNTR_1US.get()
    }
}

impl Timer for TimerUs {
    fn ticks(&self) -> u64 {
        self.now() as u64
    }

    fn frequency(&self) -> u64 {
        1_000_000
    }

    // The counter is 32 bits wide and wraps every ~71 minutes.
    fn elapsed_us(&self, start: u64) -> u64 {
        self.now().wrapping_sub(start as u32) as u64
    }

    fn delay_us(&self, us: u64) {
        let start = self.ticks();
        while self.elapsed_us(start) < us {
            core::hint::spin_loop();
        }
    }
}
