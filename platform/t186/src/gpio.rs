//! GPIO controllers.
//!
//! T186 has two controllers: `main` and the always-on `aon` one. Each port
//! holds 8 pins; a port lives at `bank * 0x1000 + port * 0x200` inside its
//! controller and every pin owns a 0x20 byte register block there.
//! Pins are numbered per controller as `port_index * 8 + pin`.

use crate::addressmap::{GPIO_AON_BASE, GPIO_MAIN_BASE};
use crate::mmio::MmioDerefWrapper;
use alloc::vec::Vec;
use bootcore::{Error, Gpio, PinMode, PinState, Result};
use spin::{Mutex, Once};
use tock_registers::interfaces::{ReadWriteable, Readable, Writeable};
use tock_registers::registers::ReadWrite;
use tock_registers::{register_bitfields, register_structs};

pub const PINS_PER_PORT: u32 = 8;

/// Register stride between pins of one port.
const PIN_STRIDE: usize = 0x20;

register_bitfields! {
    u32,

    ENABLE_CONFIG [
        /// Direction, set for output.
        IN_OUT OFFSET(1) NUMBITS(1) [
            In = 0,
            Out = 1
        ],
        /// Pin owned by the GPIO controller instead of its SFIO.
        GPIO_ENABLE OFFSET(0) NUMBITS(1) []
    ],

    INPUT [
        GPIO_IN OFFSET(0) NUMBITS(1) []
    ],

    OUTPUT_VALUE [
        GPIO_OUT_VAL OFFSET(0) NUMBITS(1) []
    ]
}

register_structs! {
    #[allow(non_snake_case)]
    pub GpioPinRegs {
        (0x00 => ENABLE_CONFIG: ReadWrite<u32, ENABLE_CONFIG::Register>),
        (0x04 => DEBOUNCE_THRESHOLD: ReadWrite<u32>),
        (0x08 => INPUT: ReadWrite<u32, INPUT::Register>),
        (0x0c => OUTPUT_CONTROL: ReadWrite<u32>),
        (0x10 => OUTPUT_VALUE: ReadWrite<u32, OUTPUT_VALUE::Register>),
        (0x14 => INTERRUPT_CLEAR: ReadWrite<u32>),
        (0x18 => _reserved),
        (0x20 => @END),
    }
}

const fn port(bank: u32, port: u32) -> u32 {
    bank * 0x1000 + port * 0x200
}

// ============================================================================
// Port tables
// ============================================================================

/// Main controller ports A, B, C, D, E, F, G, H, I, J, K, L, M, N, O, P,
/// Q, R, T, X, Y, BB, CC.
pub const MAIN_BANK_BASES: [u32; 23] = [
    port(2, 0), // A
    port(3, 0), // B
    port(3, 1), // C
    port(3, 2), // D
    port(2, 1), // E
    port(2, 2), // F
    port(4, 1), // G
    port(1, 0), // H
    port(0, 4), // I
    port(5, 0), // J
    port(5, 1), // K
    port(1, 1), // L
    port(5, 3), // M
    port(0, 0), // N
    port(0, 1), // O
    port(4, 0), // P
    port(0, 2), // Q
    port(0, 5), // R
    port(0, 3), // T
    port(1, 2), // X
    port(1, 3), // Y
    port(2, 3), // BB
    port(5, 2), // CC
];

/// AON controller ports S, U, V, W, Z, AA, EE, FF.
pub const AON_BANK_BASES: [u32; 8] = [
    port(0, 1), // S
    port(0, 2), // U
    port(0, 4), // V
    port(0, 5), // W
    port(0, 7), // Z
    port(0, 6), // AA
    port(0, 3), // EE
    port(0, 0), // FF
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpioChipId {
    Main,
    Aon,
}

/// One GPIO controller.
pub struct TegraGpio {
    name: &'static str,
    chip: GpioChipId,
    base: usize,
    bank_bases: &'static [u32],
}

impl TegraGpio {
    /// # Safety
    /// `base` must be a GPIO controller aperture laid out per `bank_bases`.
    pub const unsafe fn new(
        name: &'static str,
        chip: GpioChipId,
        base: usize,
        bank_bases: &'static [u32],
    ) -> Self {
        Self {
            name,
            chip,
            base,
            bank_bases,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn chip_id(&self) -> GpioChipId {
        self.chip
    }

    pub fn pin_count(&self) -> u32 {
        self.bank_bases.len() as u32 * PINS_PER_PORT
    }

    fn pin(&self, gpio: u32) -> Result<MmioDerefWrapper<GpioPinRegs>> {
        let bank = self
            .bank_bases
            .get((gpio / PINS_PER_PORT) as usize)
            .ok_or(Error::Invalid)?;
        let addr = self.base + *bank as usize + (gpio % PINS_PER_PORT) as usize * PIN_STRIDE;
        // SAFETY: inside the aperture promised to `new`.
        Ok(unsafe { MmioDerefWrapper::new(addr) })
    }
}

impl Gpio for TegraGpio {
    fn config(&mut self, pin: u32, mode: PinMode) -> Result<()> {
        let regs = self.pin(pin)?;
        let dir = match mode {
            PinMode::Input => ENABLE_CONFIG::IN_OUT::In,
            PinMode::Output => ENABLE_CONFIG::IN_OUT::Out,
        };
        regs.ENABLE_CONFIG
            .modify(ENABLE_CONFIG::GPIO_ENABLE::SET + dir);
        Ok(())
    }

    fn read(&self, pin: u32) -> Result<PinState> {
        let regs = self.pin(pin)?;
        Ok(PinState::from(regs.INPUT.is_set(INPUT::GPIO_IN)))
    }

    fn write(&mut self, pin: u32, state: PinState) -> Result<()> {
        let regs = self.pin(pin)?;
        regs.OUTPUT_VALUE
            .write(OUTPUT_VALUE::GPIO_OUT_VAL.val((state == PinState::High) as u32));
        Ok(())
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Registered GPIO controllers, looked up by chip id.
#[derive(Default)]
pub struct GpioRegistry {
    drivers: Vec<TegraGpio>,
}

impl GpioRegistry {
    pub const fn new() -> Self {
        Self {
            drivers: Vec::new(),
        }
    }

    /// Add a controller; a chip id can only be registered once.
    pub fn register(&mut self, driver: TegraGpio) -> Result<()> {
        if self.drivers.iter().any(|d| d.chip == driver.chip) {
            log::error!("gpio chip {:?} already registered", driver.chip);
            return Err(Error::Invalid);
        }
        log::debug!("gpio driver {} registered", driver.name);
        self.drivers.push(driver);
        Ok(())
    }

    pub fn get(&mut self, chip: GpioChipId) -> Result<&mut TegraGpio> {
        self.drivers
            .iter_mut()
            .find(|d| d.chip == chip)
            .ok_or(Error::NotFound)
    }
}

static REGISTRY: Mutex<GpioRegistry> = Mutex::new(GpioRegistry::new());
static INIT: Once<()> = Once::new();

/// Register the main and AON controllers. Later calls do nothing.
pub fn driver_init() -> Result<()> {
    let mut result = Ok(());
    INIT.call_once(|| {
        let mut reg = REGISTRY.lock();
        // SAFETY: fixed controller apertures from the address map.
        let drivers = unsafe {
            [
                TegraGpio::new("tegra_gpio_main", GpioChipId::Main, GPIO_MAIN_BASE, &MAIN_BANK_BASES),
                TegraGpio::new("tegra_gpio_aon", GpioChipId::Aon, GPIO_AON_BASE, &AON_BANK_BASES),
            ]
        };
        for drv in drivers {
            let name = drv.name;
            if let Err(e) = reg.register(drv) {
                log::error!("failed to register gpio driver {}", name);
                result = Err(e);
            }
        }
    });
    result
}

/// Run `f` on the controller registered for `chip`.
pub fn with_chip<R>(chip: GpioChipId, f: impl FnOnce(&mut TegraGpio) -> R) -> Result<R> {
    let mut reg = REGISTRY.lock();
    Ok(f(reg.get(chip)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mmio::fake::FakeRegs;

    const APERTURE: usize = 0x6000;

    fn chip(mem: &FakeRegs) -> TegraGpio {
        unsafe { TegraGpio::new("test", GpioChipId::Main, mem.base(), &MAIN_BANK_BASES) }
    }

    #[test]
    fn pin_addresses_follow_port_table() {
        let mem = FakeRegs::new(APERTURE);
        let mut gpio = chip(&mem);
        // Port B is bank 3 port 0, pin 3 at 3 * 0x20.
        gpio.config(8 + 3, PinMode::Output).unwrap();
        assert_eq!(mem.read(0x3000 + 0x60), 0b11);

        gpio.config(8 + 3, PinMode::Input).unwrap();
        assert_eq!(mem.read(0x3000 + 0x60), 0b01);
    }

    #[test]
    fn read_and_write_levels() {
        let mem = FakeRegs::new(APERTURE);
        let mut gpio = chip(&mem);
        // Port H (index 7) is bank 1 port 0.
        gpio.write(7 * 8, PinState::High).unwrap();
        assert_eq!(mem.read(0x1000 + 0x10), 1);
        gpio.write(7 * 8, PinState::Low).unwrap();
        assert_eq!(mem.read(0x1000 + 0x10), 0);

        mem.write(0x1000 + 0x20 + 0x08, 1);
        assert_eq!(gpio.read(7 * 8 + 1), Ok(PinState::High));
        assert_eq!(gpio.read(7 * 8 + 2), Ok(PinState::Low));
    }

    #[test]
    fn out_of_range_pin() {
        let mem = FakeRegs::new(APERTURE);
        let mut gpio = chip(&mem);
        let bad = gpio.pin_count();
        assert_eq!(gpio.read(bad), Err(Error::Invalid));
        assert_eq!(gpio.write(bad, PinState::High), Err(Error::Invalid));
        assert_eq!(gpio.config(bad, PinMode::Input), Err(Error::Invalid));
    }

    #[test]
    fn registry_rejects_duplicate_chip() {
        let mem = FakeRegs::new(APERTURE);
        let mut reg = GpioRegistry::new();
        reg.register(chip(&mem)).unwrap();
        assert_eq!(reg.register(chip(&mem)), Err(Error::Invalid));
        assert_eq!(reg.get(GpioChipId::Main).map(|d| d.name()), Ok("test"));
        assert!(matches!(reg.get(GpioChipId::Aon), Err(Error::NotFound)));
    }
}
