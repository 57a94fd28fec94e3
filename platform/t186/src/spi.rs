//! SPI master controller.
//!
//! PIO only: every transfer is split into FIFO sized packets of 8-bit
//! words. Chip select is driven by software and held low across all the
//! transfers of one transaction.

use crate::addressmap::SPI_BASES;
use crate::car::{ClockReset, ClockSource, Module};
use crate::mmio::{MmioDerefWrapper, RegisterWindow};
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use bootcore::{Error, Result, Timer, wait_for};
use spin::Mutex;
use tock_registers::fields::FieldValue;
use tock_registers::interfaces::{ReadWriteable, Readable, Writeable};
use tock_registers::registers::ReadWrite;
use tock_registers::{register_bitfields, register_structs};

/// Number of controllers; instances are numbered from 1.
pub const SPI_INSTANCE_COUNT: u8 = 4;

/// FIFO depth in words.
const FIFO_DEPTH: usize = 64;
const XFER_TIMEOUT_US: u64 = 100_000;

register_bitfields! {
    u32,

    COMMAND1 [
        PIO OFFSET(31) NUMBITS(1) [],
        /// Master mode.
        M_S OFFSET(30) NUMBITS(1) [],
        MODE OFFSET(28) NUMBITS(2) [],
        CS_SEL OFFSET(26) NUMBITS(2) [],
        /// Chip select under software control.
        CS_SW_HW OFFSET(21) NUMBITS(1) [],
        CS_SW_VAL OFFSET(20) NUMBITS(1) [],
        LSBIT_FE OFFSET(16) NUMBITS(1) [],
        LSBYTE_FE OFFSET(15) NUMBITS(1) [],
        RX_EN OFFSET(12) NUMBITS(1) [],
        TX_EN OFFSET(11) NUMBITS(1) [],
        PACKED OFFSET(5) NUMBITS(1) [],
        BIT_LENGTH OFFSET(0) NUMBITS(5) []
    ],

    TRANS_STATUS [
        RDY OFFSET(30) NUMBITS(1) [],
        BLK_CNT OFFSET(0) NUMBITS(16) []
    ],

    FIFO_STATUS [
        RX_FIFO_FLUSH OFFSET(15) NUMBITS(1) [],
        TX_FIFO_FLUSH OFFSET(14) NUMBITS(1) [],
        TX_FIFO_FULL OFFSET(3) NUMBITS(1) [],
        RX_FIFO_EMPTY OFFSET(0) NUMBITS(1) []
    ]
}

register_structs! {
    #[allow(non_snake_case)]
    pub SpiRegs {
        (0x000 => COMMAND1: ReadWrite<u32, COMMAND1::Register>),
        (0x004 => COMMAND2: ReadWrite<u32>),
        (0x008 => CS_TIMING1: ReadWrite<u32>),
        (0x00c => CS_TIMING2: ReadWrite<u32>),
        (0x010 => TRANS_STATUS: ReadWrite<u32, TRANS_STATUS::Register>),
        (0x014 => FIFO_STATUS: ReadWrite<u32, FIFO_STATUS::Register>),
        (0x018 => TX_DATA: ReadWrite<u32>),
        (0x01c => RX_DATA: ReadWrite<u32>),
        (0x020 => DMA_CTL: ReadWrite<u32>),
        (0x024 => DMA_BLK: ReadWrite<u32>),
        (0x028 => _reserved0),
        (0x108 => TX_FIFO: ReadWrite<u32>),
        (0x10c => _reserved1),
        (0x188 => RX_FIFO: ReadWrite<u32>),
        (0x18c => @END),
    }
}

const REGS_END: u32 = 0x18c;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum SpiMode {
    #[default]
    Mode0,
    Mode1,
    Mode2,
    Mode3,
}

impl SpiMode {
    pub fn from_u32(mode: u32) -> Result<Self> {
        match mode {
            0 => Ok(Self::Mode0),
            1 => Ok(Self::Mode1),
            2 => Ok(Self::Mode2),
            3 => Ok(Self::Mode3),
            _ => Err(Error::Invalid),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Endianness {
    pub lsbyte_first: bool,
    pub lsbit_first: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpiIoctl {
    SetEndianness(Endianness),
    SetMode(SpiMode),
    SetFreq(u32),
}

/// One transfer: `tx` is clocked out first, then `rx` is filled.
pub struct SpiTransfer<'a> {
    pub tx: &'a [u8],
    pub rx: &'a mut [u8],
}

/// Board tuning for one controller and mode, as `(offset, mask, value)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ProdSetting {
    offset: u32,
    mask: u32,
    value: u32,
}

static PROD_SETTINGS: Mutex<BTreeMap<(u8, SpiMode), Vec<ProdSetting>>> =
    Mutex::new(BTreeMap::new());

/// Record tuning values applied whenever `instance` runs in `mode`.
///
/// `settings` is a flat list of `offset, mask, value` triples.
pub fn register_prod_settings(instance: u8, mode: u32, settings: &[u32]) -> Result<()> {
    if !(1..=SPI_INSTANCE_COUNT).contains(&instance) {
        return Err(Error::Invalid);
    }
    let mode = SpiMode::from_u32(mode)?;
    if settings.is_empty() || settings.len() % 3 != 0 {
        return Err(Error::BadParameter);
    }

    let mut list = Vec::with_capacity(settings.len() / 3);
    for t in settings.chunks_exact(3) {
        if t[0] % 4 != 0 || t[0] >= REGS_END {
            log::error!("spi{}: prod offset {:#x} out of range", instance, t[0]);
            return Err(Error::BadParameter);
        }
        list.push(ProdSetting {
            offset: t[0],
            mask: t[1],
            value: t[2],
        });
    }
    PROD_SETTINGS.lock().insert((instance, mode), list);
    Ok(())
}

/// An opened SPI controller.
pub struct Spi<T> {
    instance: u8,
    regs: MmioDerefWrapper<SpiRegs>,
    freq_khz: u32,
    mode: SpiMode,
    timer: T,
}

impl<T: Timer> Spi<T> {
    /// Bring up controller `instance` (1 to 4) at `freq_khz`.
    pub fn open(instance: u8, freq_khz: u32, car: &mut dyn ClockReset, timer: T) -> Result<Self> {
        let base = *SPI_BASES
            .get((instance as usize).wrapping_sub(1))
            .ok_or(Error::Invalid)?;
        // SAFETY: fixed SPI aperture from the address map.
        unsafe { Self::open_at(instance, base, freq_khz, car, timer) }
    }

    /// # Safety
    /// `base` must be the aperture of SPI controller `instance`.
    pub unsafe fn open_at(
        instance: u8,
        base: usize,
        freq_khz: u32,
        car: &mut dyn ClockReset,
        timer: T,
    ) -> Result<Self> {
        if !(1..=SPI_INSTANCE_COUNT).contains(&instance) || freq_khz == 0 {
            return Err(Error::Invalid);
        }
        let idx = instance - 1;

        car.rst_set(Module::Spi, idx)?;
        car.clk_enable(Module::Spi, idx)?;
        car.set_clk_src(Module::Spi, idx, ClockSource::PllpOut0)?;
        let actual = car.set_clk_rate(Module::Spi, idx, freq_khz)?;
        timer.delay_us(2);
        car.rst_clear(Module::Spi, idx)?;

        let spi = Self {
            instance,
            // SAFETY: guaranteed by the caller.
            regs: unsafe { MmioDerefWrapper::new(base) },
            freq_khz: actual,
            mode: SpiMode::Mode0,
            timer,
        };
        spi.program_defaults();
        log::debug!("spi{}: open at {} kHz", instance, actual);
        Ok(spi)
    }

    fn program_defaults(&self) {
        self.regs.COMMAND1.write(
            COMMAND1::M_S::SET
                + COMMAND1::MODE.val(self.mode as u32)
                + COMMAND1::CS_SW_HW::SET
                + COMMAND1::CS_SW_VAL::SET
                + COMMAND1::BIT_LENGTH.val(7),
        );
        self.regs
            .FIFO_STATUS
            .write(FIFO_STATUS::TX_FIFO_FLUSH::SET + FIFO_STATUS::RX_FIFO_FLUSH::SET);
        self.apply_prod_settings();
    }

    fn apply_prod_settings(&self) {
        let table = PROD_SETTINGS.lock();
        let Some(list) = table.get(&(self.instance, self.mode)) else {
            return;
        };
        // SAFETY: offsets were checked against the register block size.
        let win = unsafe { RegisterWindow::new(self.regs.addr()) };
        for s in list {
            let reg = (s.offset / 4) as usize;
            win.writel(reg, (win.readl(reg) & !s.mask) | (s.value & s.mask));
        }
    }

    pub fn instance(&self) -> u8 {
        self.instance
    }

    pub fn freq_khz(&self) -> u32 {
        self.freq_khz
    }

    pub fn ioctl(&mut self, car: &mut dyn ClockReset, ioctl: SpiIoctl) -> Result<()> {
        match ioctl {
            SpiIoctl::SetEndianness(e) => {
                self.regs.COMMAND1.modify(
                    COMMAND1::LSBYTE_FE.val(e.lsbyte_first as u32)
                        + COMMAND1::LSBIT_FE.val(e.lsbit_first as u32),
                );
            }
            SpiIoctl::SetMode(mode) => {
                self.mode = mode;
                self.regs.COMMAND1.modify(COMMAND1::MODE.val(mode as u32));
                self.apply_prod_settings();
            }
            SpiIoctl::SetFreq(khz) => {
                if khz == 0 {
                    return Err(Error::Invalid);
                }
                self.freq_khz = car.set_clk_rate(Module::Spi, self.instance - 1, khz)?;
            }
        }
        Ok(())
    }

    /// Run `transfers` back to back with chip select held.
    pub fn transaction(&mut self, transfers: &mut [SpiTransfer<'_>]) -> Result<()> {
        if transfers.is_empty() {
            return Err(Error::Invalid);
        }

        self.regs
            .COMMAND1
            .modify(COMMAND1::CS_SW_HW::SET + COMMAND1::CS_SW_VAL::CLEAR);
        let res = transfers.iter_mut().try_for_each(|t| {
            for chunk in t.tx.chunks(FIFO_DEPTH) {
                self.write_packet(chunk)?;
            }
            for chunk in t.rx.chunks_mut(FIFO_DEPTH) {
                self.read_packet(chunk)?;
            }
            Ok(())
        });
        self.regs.COMMAND1.modify(COMMAND1::CS_SW_VAL::SET);

        if let Err(e) = res {
            log::error!("spi{}: transaction failed: {}", self.instance, e);
        }
        res
    }

    fn start_and_wait(&self, dir: FieldValue<u32, COMMAND1::Register>) -> Result<()> {
        self.regs.COMMAND1.modify(dir);
        self.regs.COMMAND1.modify(COMMAND1::PIO::SET);
        let res = wait_for(&self.timer, XFER_TIMEOUT_US, || {
            self.regs.TRANS_STATUS.is_set(TRANS_STATUS::RDY)
        });
        self.regs.COMMAND1.modify(
            COMMAND1::PIO::CLEAR + COMMAND1::TX_EN::CLEAR + COMMAND1::RX_EN::CLEAR,
        );
        // RDY is write-one-to-clear.
        if res.is_ok() {
            self.regs.TRANS_STATUS.write(TRANS_STATUS::RDY::SET);
        }
        res
    }

    fn write_packet(&self, data: &[u8]) -> Result<()> {
        self.regs.DMA_BLK.set(data.len() as u32 - 1);
        for &b in data {
            wait_for(&self.timer, XFER_TIMEOUT_US, || {
                !self.regs.FIFO_STATUS.is_set(FIFO_STATUS::TX_FIFO_FULL)
            })?;
            self.regs.TX_FIFO.set(b as u32);
        }
        self.start_and_wait(COMMAND1::TX_EN::SET + COMMAND1::RX_EN::CLEAR)
    }

    fn read_packet(&self, data: &mut [u8]) -> Result<()> {
        self.regs.DMA_BLK.set(data.len() as u32 - 1);
        self.start_and_wait(COMMAND1::RX_EN::SET + COMMAND1::TX_EN::CLEAR)?;
        for b in data.iter_mut() {
            if self.regs.FIFO_STATUS.is_set(FIFO_STATUS::RX_FIFO_EMPTY) {
                return Err(Error::Io);
            }
            *b = self.regs.RX_FIFO.get() as u8;
        }
        Ok(())
    }

    /// Put the controller back in reset and gate its clock.
    pub fn close(self, car: &mut dyn ClockReset) -> Result<()> {
        let idx = self.instance - 1;
        car.rst_set(Module::Spi, idx)?;
        car.clk_disable(Module::Spi, idx)
    }
}
