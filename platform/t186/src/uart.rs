//! 16550-compatible UART.
//!
//! The T186 UARTs are clocked from PLLP at 408 MHz by the earlier boot
//! stages; this driver only programs the divisor and line settings.

use crate::mmio::MmioDerefWrapper;
use bootcore::{Error, Result, Serial};
use tock_registers::interfaces::{Readable, Writeable};
use tock_registers::registers::ReadWrite;
use tock_registers::{register_bitfields, register_structs};

/// UART source clock.
const UART_CLOCK_HZ: u32 = 408_000_000;

register_bitfields! {
    u32,

    /// Line Control Register.
    LCR [
        /// Divisor latch access.
        DLAB OFFSET(7) NUMBITS(1) [],
        /// Word length.
        WLS OFFSET(0) NUMBITS(2) [
            FiveBit = 0,
            EightBit = 3
        ]
    ],

    /// FIFO Control Register.
    FCR [
        TX_CLR OFFSET(2) NUMBITS(1) [],
        RX_CLR OFFSET(1) NUMBITS(1) [],
        FCR_EN_FIFO OFFSET(0) NUMBITS(1) []
    ],

    /// Line Status Register.
    LSR [
        /// Transmit shift register empty.
        TMTY OFFSET(6) NUMBITS(1) [],
        /// Transmit holding register empty.
        THRE OFFSET(5) NUMBITS(1) [],
        /// Receive data ready.
        RDR OFFSET(0) NUMBITS(1) []
    ]
}

register_structs! {
    #[allow(non_snake_case)]
    pub UartRegs {
        /// THR on write, RBR on read, DLL with DLAB set.
        (0x00 => THR_DLAB: ReadWrite<u32>),
        /// IER, DLH with DLAB set.
        (0x04 => IER_DLAB: ReadWrite<u32>),
        /// IIR on read, FCR on write.
        (0x08 => IIR_FCR: ReadWrite<u32, FCR::Register>),
        (0x0c => LCR: ReadWrite<u32, LCR::Register>),
        (0x10 => MCR: ReadWrite<u32>),
        (0x14 => LSR: ReadWrite<u32, LSR::Register>),
        (0x18 => @END),
    }
}

pub struct Uart {
    regs: MmioDerefWrapper<UartRegs>,
}

impl Uart {
    /// # Safety
    /// `base` must be a UART aperture.
    pub const unsafe fn new(base: usize) -> Self {
        Self {
            regs: unsafe { MmioDerefWrapper::new(base) },
        }
    }

    fn divisor(baud: u32) -> Result<u32> {
        if baud == 0 {
            return Err(Error::Invalid);
        }
        let div = UART_CLOCK_HZ.div_ceil(16 * baud);
        if div > 0xFFFF {
            return Err(Error::NotSupported);
        }
        Ok(div)
    }

    /// Wait until everything written has left the shift register.
    pub fn flush(&self) {
        while !self.regs.LSR.is_set(LSR::TMTY) {
            core::hint::spin_loop();
        }
    }
}

impl Serial for Uart {
    fn init(&mut self, baud: u32) -> Result<()> {
        let div = Self::divisor(baud)?;

        self.regs.IER_DLAB.set(0);
        self.regs.LCR.write(LCR::DLAB::SET);
        self.regs.THR_DLAB.set(div & 0xFF);
        self.regs.IER_DLAB.set((div >> 8) & 0xFF);
        self.regs.LCR.write(LCR::WLS::EightBit);
        self.regs.MCR.set(0);
        self.regs
            .IIR_FCR
            .write(FCR::FCR_EN_FIFO::SET + FCR::RX_CLR::SET + FCR::TX_CLR::SET);
        Ok(())
    }

    fn write_byte(&mut self, byte: u8) {
        while !self.regs.LSR.is_set(LSR::THRE) {
            core::hint::spin_loop();
        }
        self.regs.THR_DLAB.set(byte as u32);
    }

    fn read_byte(&mut self) -> u8 {
        while !self.data_available() {
            core::hint::spin_loop();
        }
        (self.regs.THR_DLAB.get() & 0xFF) as u8
    }

    fn data_available(&self) -> bool {
        self.regs.LSR.is_set(LSR::RDR)
    }
}
