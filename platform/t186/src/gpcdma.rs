//! GPC-DMA engines.
//!
//! Three instances share one programming model: the general purpose
//! engine, the BPMP one and the SPE (always-on) one. Each channel owns a
//! 64 KiB register page following the common page of its engine.

use crate::addressmap::{AON_DMA_BASE, BPMP_DMA_BASE, GPCDMA_BASE};
use crate::car::{ClockReset, Module};
use crate::mmio::MmioDerefWrapper;
use arch_aarch64::cache;
use bootcore::{Error, Result, Timer, wait_for};
use tock_registers::interfaces::{ReadWriteable, Readable, Writeable};
use tock_registers::registers::ReadWrite;
use tock_registers::{register_bitfields, register_structs};

const CHANNEL_PAGE: usize = 0x10000;
/// Largest single transfer.
pub const MAX_TRANSFER_SIZE: u32 = 1 << 30;
const MC_REQ_CNT: u32 = 0x10;
const DMA_TIMEOUT_US: u64 = 1_000_000;

register_bitfields! {
    u32,

    CSR [
        ENABLE OFFSET(31) NUMBITS(1) [],
        RUN_ONCE OFFSET(27) NUMBITS(1) [],
        /// MMIO flow control.
        FC_MMIO OFFSET(24) NUMBITS(2) [
            OneMmio = 1,
            FourMmio = 3
        ],
        XFER_MODE OFFSET(21) NUMBITS(3) [
            Io2MemFc = 1,
            Mem2IoFc = 3
        ],
        REQ_SEL OFFSET(16) NUMBITS(5) [],
        IRQ_MASK OFFSET(15) NUMBITS(1) [],
        WEIGHT OFFSET(10) NUMBITS(4) []
    ],

    STAT [
        BUSY OFFSET(31) NUMBITS(1) []
    ],

    HI_ADR_PTR [
        DST OFFSET(16) NUMBITS(8) [],
        SRC OFFSET(0) NUMBITS(8) []
    ],

    MC_SEQ [
        REQ_CNT OFFSET(25) NUMBITS(6) [],
        BURST OFFSET(23) NUMBITS(2) [
            TwoWords = 0,
            SixteenWords = 3
        ]
    ],

    MMIO_SEQ [
        BUS_WIDTH OFFSET(28) NUMBITS(3) [],
        MMIO_BURST OFFSET(23) NUMBITS(4) [
            OneWord = 0,
            EightWords = 7
        ]
    ]
}

register_structs! {
    #[allow(non_snake_case)]
    pub ChannelRegs {
        (0x00 => CSR: ReadWrite<u32, CSR::Register>),
        (0x04 => STAT: ReadWrite<u32, STAT::Register>),
        (0x08 => _reserved0),
        (0x0c => SRC_PTR: ReadWrite<u32>),
        (0x10 => DST_PTR: ReadWrite<u32>),
        (0x14 => HI_ADR_PTR: ReadWrite<u32, HI_ADR_PTR::Register>),
        (0x18 => MC_SEQ: ReadWrite<u32, MC_SEQ::Register>),
        (0x1c => MMIO_SEQ: ReadWrite<u32, MMIO_SEQ::Register>),
        (0x20 => WCOUNT: ReadWrite<u32>),
        (0x24 => _reserved1),
        (0x34 => FIXED_PATTERN: ReadWrite<u32>),
        (0x38 => @END),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaType {
    Gpc,
    Bpmp,
    Spe,
}

impl DmaType {
    pub const COUNT: usize = 3;

    pub const fn max_channels(self) -> u8 {
        match self {
            DmaType::Gpc => 32,
            DmaType::Bpmp => 4,
            DmaType::Spe => 8,
        }
    }

    const fn module(self) -> Module {
        match self {
            DmaType::Gpc => Module::GpcDma,
            DmaType::Bpmp => Module::BpmpDma,
            DmaType::Spe => Module::SpeDma,
        }
    }
}

/// Transfer direction; the value is the CSR transfer mode for memory
/// transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaDirection {
    IoToMem = 0,
    MemToIo = 2,
    MemToMem = 4,
    PatternFill = 6,
}

impl DmaDirection {
    const fn is_io(self) -> bool {
        matches!(self, Self::IoToMem | Self::MemToIo)
    }

    const fn dst_is_mem(self) -> bool {
        matches!(self, Self::IoToMem | Self::MemToMem | Self::PatternFill)
    }

    const fn src_is_mem(self) -> bool {
        matches!(self, Self::MemToIo | Self::MemToMem)
    }
}

/// Width of the I/O side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BusWidth {
    Bits8 = 0,
    Bits16 = 1,
    #[default]
    Bits32 = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XferParams {
    pub src: u64,
    pub dst: u64,
    /// Bytes, a multiple of 4.
    pub size: u32,
    pub dir: DmaDirection,
    /// Request select of the peripheral for I/O transfers.
    pub io: u32,
    pub io_bus_width: BusWidth,
    pub pattern: u32,
    pub is_async: bool,
}

impl XferParams {
    pub const fn mem_to_mem(dst: u64, src: u64, size: u32) -> Self {
        Self {
            src,
            dst,
            size,
            dir: DmaDirection::MemToMem,
            io: 0,
            io_bus_width: BusWidth::Bits32,
            pattern: 0,
            is_async: false,
        }
    }

    fn map_buffers(&self) {
        if self.dir.dst_is_mem() {
            cache::clean_invalidate_dcache_range(self.dst as usize, self.size as usize);
        }
        if self.dir.src_is_mem() {
            cache::clean_dcache_range(self.src as usize, self.size as usize);
        }
    }

    fn unmap_buffers(&self) {
        if self.dir.dst_is_mem() {
            cache::invalidate_dcache_range(self.dst as usize, self.size as usize);
        }
    }
}

fn check_size(size: u32) -> Result<()> {
    if size == 0 || size > MAX_TRANSFER_SIZE || size % 4 != 0 {
        log::error!("invalid DMA size {:#x}", size);
        return Err(Error::InvalidTransferSize);
    }
    Ok(())
}

/// Engine handed out by [`DmaEngines::request`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaHandle(DmaType);

impl DmaHandle {
    pub fn dma_type(&self) -> DmaType {
        self.0
    }
}

/// Byte size thresholds above which buffer copies and fills go through DMA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClibDma {
    pub dma_type: DmaType,
    pub memcpy_threshold: usize,
    pub memset_threshold: usize,
}

/// The three DMA engines.
pub struct DmaEngines<T> {
    bases: [usize; DmaType::COUNT],
    init_done: [bool; DmaType::COUNT],
    clib: Option<ClibDma>,
    timer: T,
}

impl<T: Timer> DmaEngines<T> {
    pub const fn new(timer: T) -> Self {
        // SAFETY: fixed engine apertures from the address map.
        unsafe { Self::with_bases([GPCDMA_BASE, BPMP_DMA_BASE, AON_DMA_BASE], timer) }
    }

    /// # Safety
    /// `bases` must be the GPC, BPMP and SPE engine apertures, each
    /// covering all of its channel pages.
    pub const unsafe fn with_bases(bases: [usize; DmaType::COUNT], timer: T) -> Self {
        Self {
            bases,
            init_done: [false; DmaType::COUNT],
            clib: None,
            timer,
        }
    }

    /// Take engine `ty` out of reset on first use.
    pub fn request(&mut self, car: &mut dyn ClockReset, ty: DmaType) -> Result<DmaHandle> {
        if self.init_done[ty as usize] {
            return Ok(DmaHandle(ty));
        }
        car.rst_set(ty.module(), 0)?;
        self.timer.delay_us(2);
        car.rst_clear(ty.module(), 0)?;
        self.init_done[ty as usize] = true;
        log::debug!("dma {:?} out of reset", ty);
        Ok(DmaHandle(ty))
    }

    fn channel(&self, handle: DmaHandle, channel: u8) -> Result<MmioDerefWrapper<ChannelRegs>> {
        let ty = handle.0;
        if !self.init_done[ty as usize] {
            return Err(Error::NotInitialized);
        }
        if channel >= ty.max_channels() {
            return Err(Error::InvalidChannel);
        }
        let addr = self.bases[ty as usize] + CHANNEL_PAGE * (channel as usize + 1);
        // SAFETY: channel pages lie inside the engine aperture.
        Ok(unsafe { MmioDerefWrapper::new(addr) })
    }

    fn ensure_idle(regs: &ChannelRegs, channel: u8) -> Result<()> {
        if regs.STAT.is_set(STAT::BUSY) {
            log::error!("DMA channel {} is busy", channel);
            return Err(Error::ChannelBusy);
        }
        Ok(())
    }

    fn wait_idle(&self, regs: &ChannelRegs) -> Result<()> {
        wait_for(&self.timer, DMA_TIMEOUT_US, || !regs.STAT.is_set(STAT::BUSY))
            .inspect_err(|_| log::error!("DMA transfer timed out"))
    }

    /// Program and start one transfer on `channel`.
    ///
    /// Synchronous transfers return once the channel is idle again;
    /// asynchronous ones are followed up with [`transfer_status`](Self::transfer_status).
    pub fn transfer(&mut self, handle: DmaHandle, channel: u8, params: &mut XferParams) -> Result<()> {
        let regs = self.channel(handle, channel)?;
        check_size(params.size)?;
        Self::ensure_idle(&regs, channel)?;

        regs.CSR.set(0);

        let burst = if params.dir.is_io() {
            MC_SEQ::BURST::TwoWords
        } else {
            MC_SEQ::BURST::SixteenWords
        };
        regs.MC_SEQ.modify(MC_SEQ::REQ_CNT.val(MC_REQ_CNT) + burst);

        if params.dir.is_io() {
            regs.MMIO_SEQ.modify(
                MMIO_SEQ::BUS_WIDTH.val(params.io_bus_width as u32)
                    + MMIO_SEQ::MMIO_BURST::EightWords,
            );
        }

        if params.dir != DmaDirection::PatternFill {
            params.pattern = 0;
        }
        regs.FIXED_PATTERN.set(params.pattern);

        params.map_buffers();

        regs.SRC_PTR.set(params.src as u32);
        regs.DST_PTR.set(params.dst as u32);
        regs.HI_ADR_PTR.write(
            HI_ADR_PTR::SRC.val((params.src >> 32) as u32 & 0xFF)
                + HI_ADR_PTR::DST.val((params.dst >> 32) as u32 & 0xFF),
        );
        regs.WCOUNT.set(params.size / 4 - 1);

        let mode = match params.dir {
            DmaDirection::IoToMem => CSR::XFER_MODE::Io2MemFc,
            DmaDirection::MemToIo => CSR::XFER_MODE::Mem2IoFc,
            dir => CSR::XFER_MODE.val(dir as u32),
        };
        let mut csr = CSR::IRQ_MASK::SET + CSR::RUN_ONCE::SET + CSR::WEIGHT.val(1) + mode;
        if params.dir.is_io() {
            csr += CSR::REQ_SEL.val(params.io) + CSR::FC_MMIO::FourMmio;
        }
        regs.CSR.write(csr);
        regs.CSR.modify(CSR::ENABLE::SET);

        if params.is_async {
            return Ok(());
        }
        self.wait_idle(&regs)?;
        params.unmap_buffers();
        Ok(())
    }

    /// `ChannelBusy` while an asynchronous transfer is still running.
    pub fn transfer_status(&self, handle: DmaHandle, channel: u8, params: &XferParams) -> Result<()> {
        let regs = self.channel(handle, channel)?;
        if regs.STAT.is_set(STAT::BUSY) {
            return Err(Error::ChannelBusy);
        }
        params.unmap_buffers();
        Ok(())
    }

    pub fn transfer_abort(&self, handle: DmaHandle, channel: u8) -> Result<()> {
        self.channel(handle, channel)?.CSR.set(0);
        Ok(())
    }

    /// Copy `size` bytes between word aligned physical buffers.
    pub fn memcpy(
        &mut self,
        car: &mut dyn ClockReset,
        ty: DmaType,
        dest: u64,
        src: u64,
        size: u32,
    ) -> Result<()> {
        if dest == 0 || src == 0 || (dest | src | size as u64) & 3 != 0 {
            return Err(Error::Invalid);
        }
        let handle = self.request(car, ty)?;
        self.transfer(handle, 0, &mut XferParams::mem_to_mem(dest, src, size))
    }

    /// Fill `size` bytes at `dest` with `byte`.
    pub fn memset(
        &mut self,
        car: &mut dyn ClockReset,
        ty: DmaType,
        dest: u64,
        byte: u8,
        size: u32,
    ) -> Result<()> {
        if dest == 0 || (dest | size as u64) & 3 != 0 {
            return Err(Error::Invalid);
        }
        let handle = self.request(car, ty)?;
        let mut params = XferParams {
            src: 0,
            pattern: u32::from_ne_bytes([byte; 4]),
            dir: DmaDirection::PatternFill,
            ..XferParams::mem_to_mem(dest, 0, size)
        };
        self.transfer(handle, 0, &mut params)
    }

    /// Scrub memory on GPC channel 0 by copy or pattern fill.
    pub fn init_scrub(
        &mut self,
        car: &mut dyn ClockReset,
        dest: u64,
        src: u64,
        pattern: u32,
        size: u32,
        dir: DmaDirection,
    ) -> Result<()> {
        if !matches!(dir, DmaDirection::MemToMem | DmaDirection::PatternFill) {
            log::error!("invalid scrub transfer type {:?}", dir);
            return Err(Error::BadParameter);
        }
        check_size(size)?;
        let handle = self.request(car, DmaType::Gpc)?;
        let regs = self.channel(handle, 0)?;
        Self::ensure_idle(&regs, 0)?;

        regs.MC_SEQ.modify(MC_SEQ::REQ_CNT.val(MC_REQ_CNT) + MC_SEQ::BURST::SixteenWords);
        regs.FIXED_PATTERN.set(pattern);
        regs.SRC_PTR.set(src as u32);
        regs.DST_PTR.set(dest as u32);
        regs.HI_ADR_PTR.write(
            HI_ADR_PTR::SRC.val((src >> 32) as u32 & 0xFF)
                + HI_ADR_PTR::DST.val((dest >> 32) as u32 & 0xFF),
        );
        regs.WCOUNT.set(size / 4 - 1);
        regs.CSR.modify(CSR::XFER_MODE.val(dir as u32));
        regs.CSR.modify(CSR::ENABLE::SET);

        log::debug!("scrub {:#x} + {:#x}", dest, size);
        self.wait_idle(&regs)
    }

    /// Route large buffer copies and fills through engine `ty`.
    pub fn enable_clib_callbacks(&mut self, ty: DmaType, threshold: usize) {
        self.clib = Some(ClibDma {
            dma_type: ty,
            memcpy_threshold: threshold,
            memset_threshold: threshold,
        });
    }

    pub fn clib(&self) -> Option<ClibDma> {
        self.clib
    }

    /// Copy `src` into `dst`, by DMA when the clib callbacks allow it.
    pub fn copy(&mut self, car: &mut dyn ClockReset, dst: &mut [u8], src: &[u8]) -> Result<()> {
        if dst.len() != src.len() {
            return Err(Error::Invalid);
        }
        if let Some(clib) = self.clib {
            let (d, s) = (dst.as_mut_ptr() as u64, src.as_ptr() as u64);
            if src.len() >= clib.memcpy_threshold && (d | s | src.len() as u64) & 3 == 0 {
                let size = u32::try_from(src.len()).map_err(|_| Error::InvalidTransferSize)?;
                cache::clean_dcache_range(s as usize, src.len());
                cache::clean_invalidate_dcache_range(d as usize, dst.len());
                self.memcpy(car, clib.dma_type, d, s, size)?;
                cache::invalidate_dcache_range(d as usize, dst.len());
                return Ok(());
            }
        }
        dst.copy_from_slice(src);
        Ok(())
    }

    /// Fill `dst` with `byte`, by DMA when the clib callbacks allow it.
    pub fn fill(&mut self, car: &mut dyn ClockReset, dst: &mut [u8], byte: u8) -> Result<()> {
        if let Some(clib) = self.clib {
            let d = dst.as_mut_ptr() as u64;
            if dst.len() >= clib.memset_threshold && (d | dst.len() as u64) & 3 == 0 {
                let size = u32::try_from(dst.len()).map_err(|_| Error::InvalidTransferSize)?;
                cache::clean_invalidate_dcache_range(d as usize, dst.len());
                self.memset(car, clib.dma_type, d, byte, size)?;
                cache::invalidate_dcache_range(d as usize, dst.len());
                return Ok(());
            }
        }
        dst.fill(byte);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::car::fake::{CarOp, RecordingCar};
    use crate::mmio::fake::FakeRegs;
    use crate::timer::fake::FakeTimer;

    const CH0: usize = CHANNEL_PAGE;
    const CH1: usize = 2 * CHANNEL_PAGE;

    fn engines(mem: &FakeRegs) -> DmaEngines<FakeTimer> {
        let b = mem.base();
        unsafe { DmaEngines::with_bases([b, b, b], FakeTimer::default()) }
    }

    fn setup() -> (FakeRegs, RecordingCar) {
        (FakeRegs::new(3 * CHANNEL_PAGE), RecordingCar::default())
    }

    #[test]
    fn request_resets_engine_once() {
        let (mem, mut car) = setup();
        let mut dma = engines(&mem);
        let h = dma.request(&mut car, DmaType::Bpmp).unwrap();
        assert_eq!(h.dma_type(), DmaType::Bpmp);
        dma.request(&mut car, DmaType::Bpmp).unwrap();
        assert_eq!(
            car.ops,
            [CarOp::RstSet(Module::BpmpDma, 0), CarOp::RstClear(Module::BpmpDma, 0)]
        );
    }

    #[test]
    fn io_to_mem_programming() {
        let (mem, mut car) = setup();
        let mut dma = engines(&mem);
        let h = dma.request(&mut car, DmaType::Gpc).unwrap();

        let mut params = XferParams {
            src: 0x0321_0188,
            dst: 0x1_2345_6780,
            size: 64,
            dir: DmaDirection::IoToMem,
            io: 5,
            io_bus_width: BusWidth::Bits32,
            pattern: 0xdead_beef,
            is_async: false,
        };
        dma.transfer(h, 1, &mut params).unwrap();

        assert_eq!(params.pattern, 0);
        assert_eq!(mem.read(CH1 + 0x34), 0);
        assert_eq!(mem.read(CH1 + 0x0c), 0x0321_0188);
        assert_eq!(mem.read(CH1 + 0x10), 0x2345_6780);
        assert_eq!(mem.read(CH1 + 0x14), 1 << 16);
        assert_eq!(mem.read(CH1 + 0x20), 15);
        assert_eq!(mem.read(CH1 + 0x18), (0x10 << 25) | (0 << 23));
        assert_eq!(mem.read(CH1 + 0x1c), (2 << 28) | (7 << 23));
        let csr = (1 << 31) | (3 << 24) | (1 << 21) | (5 << 16) | (1 << 15) | (1 << 27) | (1 << 10);
        assert_eq!(mem.read(CH1), csr);
    }

    #[test]
    fn mem_to_mem_and_pattern_fill() {
        let (mem, mut car) = setup();
        let mut dma = engines(&mem);

        dma.memcpy(&mut car, DmaType::Gpc, 0x8000_2000, 0x8000_0000, 0x1000).unwrap();
        assert_eq!(mem.read(CH0 + 0x18), (0x10 << 25) | (3 << 23));
        assert_eq!(mem.read(CH0 + 0x1c), 0);
        assert_eq!((mem.read(CH0) >> 21) & 7, 4);
        assert_eq!((mem.read(CH0) >> 24) & 3, 0);

        dma.memset(&mut car, DmaType::Gpc, 0x8000_2000, 0xA5, 0x100).unwrap();
        assert_eq!(mem.read(CH0 + 0x34), 0xA5A5_A5A5);
        assert_eq!((mem.read(CH0) >> 21) & 7, 6);

        assert_eq!(
            dma.memcpy(&mut car, DmaType::Gpc, 0x8000_2002, 0x8000_0000, 0x10),
            Err(Error::Invalid)
        );
        assert_eq!(dma.memset(&mut car, DmaType::Gpc, 0, 0, 4), Err(Error::Invalid));
    }

    #[test]
    fn rejects_bad_requests_before_touching_hardware() {
        let (mem, mut car) = setup();
        let mut dma = engines(&mem);
        let mut params = XferParams::mem_to_mem(0x8000_0000, 0x9000_0000, 6);

        assert_eq!(dma.transfer(DmaHandle(DmaType::Gpc), 0, &mut params), Err(Error::NotInitialized));
        let h = dma.request(&mut car, DmaType::Gpc).unwrap();
        assert_eq!(dma.transfer(h, 0, &mut params), Err(Error::InvalidTransferSize));
        params.size = MAX_TRANSFER_SIZE + 4;
        assert_eq!(dma.transfer(h, 0, &mut params), Err(Error::InvalidTransferSize));
        params.size = 16;
        assert_eq!(dma.transfer(h, 32, &mut params), Err(Error::InvalidChannel));
        assert_eq!(mem.read(CH0), 0);

        mem.write(CH0 + 0x04, 1 << 31);
        assert_eq!(dma.transfer(h, 0, &mut params), Err(Error::ChannelBusy));
    }

    #[test]
    fn async_transfer_and_status() {
        let (mem, mut car) = setup();
        let mut dma = engines(&mem);
        let h = dma.request(&mut car, DmaType::Spe).unwrap();
        let mut params = XferParams {
            is_async: true,
            ..XferParams::mem_to_mem(0x8000_0000, 0x9000_0000, 16)
        };
        dma.transfer(h, 1, &mut params).unwrap();

        mem.write(CH1 + 0x04, 1 << 31);
        assert_eq!(dma.transfer_status(h, 1, &params), Err(Error::ChannelBusy));
        mem.write(CH1 + 0x04, 0);
        assert_eq!(dma.transfer_status(h, 1, &params), Ok(()));

        dma.transfer_abort(h, 1).unwrap();
        assert_eq!(mem.read(CH1), 0);
    }

    #[test]
    fn scrub_only_copies_or_fills() {
        let (mem, mut car) = setup();
        let mut dma = engines(&mem);
        assert_eq!(
            dma.init_scrub(&mut car, 0x8000_0000, 0, 0, 0x100, DmaDirection::IoToMem),
            Err(Error::BadParameter)
        );
        assert!(car.ops.is_empty());

        dma.init_scrub(&mut car, 0x1_0000_0000, 0, 0x5a5a_5a5a, 0x100, DmaDirection::PatternFill)
            .unwrap();
        assert_eq!(mem.read(CH0 + 0x34), 0x5a5a_5a5a);
        assert_eq!(mem.read(CH0 + 0x14), 1 << 16);
        assert_eq!(mem.read(CH0 + 0x20), 0x3F);
        assert_eq!(mem.read(CH0) >> 31, 1);
    }

    #[test]
    fn clib_thresholds() {
        let (mem, mut car) = setup();
        let mut dma = engines(&mem);

        let src = [7u32; 4];
        let mut dst = [0u32; 4];
        let (s, d) = unsafe {
            (
                core::slice::from_raw_parts(src.as_ptr() as *const u8, 16),
                core::slice::from_raw_parts_mut(dst.as_mut_ptr() as *mut u8, 16),
            )
        };

        // Below the threshold the CPU copies.
        dma.enable_clib_callbacks(DmaType::Gpc, 64);
        dma.copy(&mut car, d, s).unwrap();
        assert!(car.ops.is_empty());
        assert_eq!(d, s);

        // At the threshold the engine is programmed instead.
        dma.enable_clib_callbacks(DmaType::Gpc, 16);
        dma.fill(&mut car, d, 0).unwrap();
        assert_eq!(mem.read(CH0 + 0x10), d.as_ptr() as u32);
        assert_eq!(dma.clib().map(|c| c.memset_threshold), Some(16));
    }
}
