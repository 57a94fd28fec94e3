//! Boot console.
//!
//! One console is registered early (UART or debugger semihosting) and then
//! opened by whoever prints: usually the logger.

use crate::addressmap::{UARTA_BASE, UARTB_BASE, UARTC_BASE};
use crate::uart::Uart;
use bootcore::{Error, Result, Serial};
use spin::Mutex;

/// Default console baud rate.
pub const CONSOLE_BAUD: u32 = 115_200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleInterface {
    Uart,
    Semihost,
}

enum Device {
    Uart(Uart),
    Semihost,
}

/// An opened console.
pub struct Console {
    interface: ConsoleInterface,
    instance: u32,
    dev: Device,
}

static REGISTERED: Mutex<Option<Console>> = Mutex::new(None);

impl Console {
    /// Console on an already mapped UART.
    pub fn from_uart(instance: u32, mut uart: Uart, baud: u32) -> Result<Self> {
        uart.init(baud)?;
        Ok(Self {
            interface: ConsoleInterface::Uart,
            instance,
            dev: Device::Uart(uart),
        })
    }

    pub const fn semihost() -> Self {
        Self {
            interface: ConsoleInterface::Semihost,
            instance: 0,
            dev: Device::Semihost,
        }
    }

    pub fn interface(&self) -> ConsoleInterface {
        self.interface
    }

    pub fn instance(&self) -> u32 {
        self.instance
    }

    pub fn putchar(&mut self, ch: u8) -> Result<()> {
        match &mut self.dev {
            Device::Uart(uart) => uart.write_byte(ch),
            Device::Semihost => semihost::write_char(ch),
        }
        Ok(())
    }

    pub fn getchar(&mut self) -> Result<u8> {
        match &mut self.dev {
            Device::Uart(uart) => Ok(uart.read_byte()),
            Device::Semihost => semihost::read_char(),
        }
    }

    /// Print `s`, expanding `\n` to `\r\n`.
    pub fn puts(&mut self, s: &str) -> Result<()> {
        for b in s.bytes() {
            if b == b'\n' {
                self.putchar(b'\r')?;
            }
            self.putchar(b)?;
        }
        Ok(())
    }

    /// Drain pending output.
    pub fn close(&mut self) -> Result<()> {
        if let Device::Uart(uart) = &self.dev {
            uart.flush();
        }
        Ok(())
    }
}

impl Serial for Console {
    fn init(&mut self, baud: u32) -> Result<()> {
        match &mut self.dev {
            Device::Uart(uart) => uart.init(baud),
            Device::Semihost => Ok(()),
        }
    }

    fn write_byte(&mut self, byte: u8) {
        let _ = self.putchar(byte);
    }

    fn read_byte(&mut self) -> u8 {
        self.getchar().unwrap_or(0)
    }

    fn data_available(&self) -> bool {
        match &self.dev {
            Device::Uart(uart) => uart.data_available(),
            Device::Semihost => false,
        }
    }
}

/// Register the boot console on `interface`.
///
/// UART instances 0 to 2 are UARTA to UARTC.
pub fn register(interface: ConsoleInterface, instance: u32) -> Result<()> {
    let console = match interface {
        ConsoleInterface::Uart => {
            let base = match instance {
                0 => UARTA_BASE,
                1 => UARTB_BASE,
                2 => UARTC_BASE,
                _ => return Err(Error::Invalid),
            };
            // SAFETY: fixed UART aperture from the address map.
            Console::from_uart(instance, unsafe { Uart::new(base) }, CONSOLE_BAUD)?
        }
        ConsoleInterface::Semihost => Console::semihost(),
    };
    *REGISTERED.lock() = Some(console);
    Ok(())
}

/// Take the registered console.
pub fn open() -> Result<Console> {
    REGISTERED.lock().take().ok_or(Error::NotInitialized)
}

/// ARM semihosting through `hlt #0xf000`.
mod semihost {
    use bootcore::{Error, Result};

    const SYS_WRITEC: u64 = 0x03;
    const SYS_READC: u64 = 0x07;

    #[cfg(all(target_arch = "aarch64", target_os = "none"))]
    fn call(op: u64, arg: u64) -> u64 {
        let ret: u64;
        // SAFETY: semihosting traps to the attached debugger.
        unsafe {
            core::arch::asm!("hlt #0xf000", inout("x0") op => ret, in("x1") arg, options(nostack));
        }
        ret
    }

    #[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
    fn call(_op: u64, _arg: u64) -> u64 {
        u64::MAX
    }

    pub fn write_char(ch: u8) {
        let c = ch;
        call(SYS_WRITEC, &c as *const u8 as u64);
    }

    pub fn read_char() -> Result<u8> {
        match call(SYS_READC, 0) {
            ret if ret <= 0xFF => Ok(ret as u8),
            _ => Err(Error::Io),
        }
    }
}
