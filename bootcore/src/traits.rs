//! Platform abstraction traits.
//!
//! These traits define the interface that each platform must implement
//! to participate in the bootloader.

use crate::{Error, Result};

/// Serial/UART interface for debug output.
pub trait Serial {
    /// Initialize the serial interface with the given baud rate.
    fn init(&mut self, baud: u32) -> Result<()>;

    /// Write a single byte, blocking until complete.
    fn write_byte(&mut self, byte: u8);

    /// Read a single byte, blocking until available.
    fn read_byte(&mut self) -> u8;

    /// Check if data is available to read.
    fn data_available(&self) -> bool;

    /// Write a byte slice.
    fn write_bytes(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.write_byte(b);
        }
    }

    /// Write a string.
    fn write_str(&mut self, s: &str) {
        self.write_bytes(s.as_bytes());
    }

    /// Write a string with newline.
    fn write_line(&mut self, s: &str) {
        self.write_str(s);
        self.write_byte(b'\r');
        self.write_byte(b'\n');
    }
}

/// Direction of a GPIO pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    Input,
    Output,
}

/// Logic level of a GPIO pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinState {
    Low,
    High,
}

impl From<bool> for PinState {
    fn from(high: bool) -> Self {
        if high { PinState::High } else { PinState::Low }
    }
}

/// GPIO controller interface.
///
/// Pins are numbered controller-wide (`bank * 8 + pin`); an out of range
/// pin yields [`Error::Invalid`].
pub trait Gpio {
    /// Configure the pin direction and hand it to the GPIO controller.
    fn config(&mut self, pin: u32, mode: PinMode) -> Result<()>;

    /// Read the input level of a pin.
    fn read(&self, pin: u32) -> Result<PinState>;

    /// Drive an output pin.
    fn write(&mut self, pin: u32, state: PinState) -> Result<()>;
}

/// Timer interface for delays.
pub trait Timer {
    /// Get current tick count (platform-specific resolution).
    fn ticks(&self) -> u64;

    /// Get tick frequency in Hz.
    fn frequency(&self) -> u64;

    /// Microseconds elapsed since `start` (a previous `ticks()` value).
    fn elapsed_us(&self, start: u64) -> u64 {
        let delta = self.ticks().wrapping_sub(start);
        delta.saturating_mul(1_000_000) / self.frequency().max(1)
    }

    /// Delay for specified microseconds.
    fn delay_us(&self, us: u64) {
        let start = self.ticks();
        let ticks_needed = (us * self.frequency()) / 1_000_000;
        while self.ticks().wrapping_sub(start) < ticks_needed {
            core::hint::spin_loop();
        }
    }

    /// Delay for specified milliseconds.
    fn delay_ms(&self, ms: u64) {
        self.delay_us(ms * 1000);
    }
}

impl<T: Timer + ?Sized> Timer for &T {
    fn ticks(&self) -> u64 {
        (**self).ticks()
    }

    fn frequency(&self) -> u64 {
        (**self).frequency()
    }
}

/// Poll `cond` until it returns true or `timeout_us` elapses.
pub fn wait_for<T: Timer + ?Sized>(
    timer: &T,
    timeout_us: u64,
    mut cond: impl FnMut() -> bool,
) -> Result<()> {
    let start = timer.ticks();
    loop {
        if cond() {
            return Ok(());
        }
        if timer.elapsed_us(start) >= timeout_us {
            return if cond() { Ok(()) } else { Err(Error::Timeout) };
        }
        core::hint::spin_loop();
    }
}

/// Block storage device.
pub trait BlockDevice {
    /// Size of one block in bytes.
    fn block_size(&self) -> usize;

    /// Number of addressable blocks.
    fn block_count(&self) -> u64;

    /// Read whole blocks starting at `lba`; `buf` length must be a multiple of the block size.
    fn read_blocks(&mut self, lba: u64, buf: &mut [u8]) -> Result<()>;

    /// Write whole blocks starting at `lba`; `buf` length must be a multiple of the block size.
    fn write_blocks(&mut self, lba: u64, buf: &[u8]) -> Result<()>;
}


#[cfg(test)]
mod tests {
    use super::test_util::FakeTimer;
    use super::*;
    use core::cell::Cell;

    #[test]
    fn wait_for_succeeds_once_condition_holds() {
        let timer = FakeTimer(Cell::new(0));
        let mut polls = 0;
        let res = wait_for(&timer, 100, || {
            polls += 1;
            polls == 3
        });
        assert_eq!(res, Ok(()));
    }

    #[test]
    fn wait_for_times_out() {
        let timer = FakeTimer(Cell::new(0));
        assert_eq!(wait_for(&timer, 10, || false), Err(Error::Timeout));
    }

    #[test]
    fn timer_by_reference() {
        let timer = FakeTimer(Cell::new(5));
        let r = &timer;
        assert_eq!(r.ticks(), 5);
        assert_eq!(r.frequency(), 1_000_000);
    }

    #[test]
    fn pin_state_from_bool() {
        assert_eq!(PinState::from(true), PinState::High);
        assert_eq!(PinState::from(false), PinState::Low);
    }
}
