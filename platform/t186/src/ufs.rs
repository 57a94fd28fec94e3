//! UFS host controller and block device.
//!
//! Minimal UFSHCI driver: one UTP transfer request slot, SCSI `READ(10)` and
//! `WRITE(10)` with a single PRDT entry, polled completion.

use crate::addressmap::{TMRUS_BASE, UFSHC_BASE};
use crate::mmio::MmioDerefWrapper;
use crate::timer::TimerUs;
use alloc::boxed::Box;
use arch_aarch64::cache;
use bootcore::{BlockDevice, Error, Result, Timer, wait_for};
use core::ptr::{addr_of, addr_of_mut, read_volatile};
use spin::Mutex;
use tock_registers::interfaces::{Readable, Writeable};
use tock_registers::registers::ReadWrite;
use tock_registers::{register_bitfields, register_structs};

const HCE_TIMEOUT_US: u64 = 10_000;
const UIC_TIMEOUT_US: u64 = 100_000;
const XFER_TIMEOUT_US: u64 = 1_000_000;

/// UIC command starting the link.
pub const DME_LINKSTARTUP: u32 = 0x16;

/// Bytes one PRDT entry can carry.
const PRDT_MAX_BYTES: usize = 256 * 1024;

const UPIU_COMMAND: u8 = 0x01;
const UPIU_RESPONSE: u8 = 0x21;
const UPIU_FLAG_READ: u8 = 0x40;
const UPIU_FLAG_WRITE: u8 = 0x20;

const SCSI_READ10: u8 = 0x28;
const SCSI_WRITE10: u8 = 0x2A;
const SCSI_READ_CAPACITY10: u8 = 0x25;

/// Overall command status written back by the controller.
const OCS_SUCCESS: u8 = 0x0;
const OCS_INVALID: u8 = 0xF;

register_bitfields! {
    u32,

    IS [
        /// UIC command completion.
        UCCS OFFSET(10) NUMBITS(1) [],
        /// UTP transfer request completion.
        UTRCS OFFSET(0) NUMBITS(1) []
    ],

    HCS [
        UCRDY OFFSET(3) NUMBITS(1) [],
        UTRLRDY OFFSET(1) NUMBITS(1) [],
        /// Device present.
        DP OFFSET(0) NUMBITS(1) []
    ],

    HCE [
        ENABLE OFFSET(0) NUMBITS(1) []
    ]
}

register_structs! {
    #[allow(non_snake_case)]
    pub UfsRegs {
        (0x00 => CAP: ReadWrite<u32>),
        (0x04 => _reserved0),
        (0x08 => VER: ReadWrite<u32>),
        (0x0c => _reserved1),
        (0x20 => IS: ReadWrite<u32, IS::Register>),
        (0x24 => IE: ReadWrite<u32>),
        (0x28 => _reserved2),
        (0x30 => HCS: ReadWrite<u32, HCS::Register>),
        (0x34 => HCE: ReadWrite<u32, HCE::Register>),
        (0x38 => _reserved3),
        (0x50 => UTRLBA: ReadWrite<u32>),
        (0x54 => UTRLBAU: ReadWrite<u32>),
        (0x58 => UTRLDBR: ReadWrite<u32>),
        (0x5c => UTRLCLR: ReadWrite<u32>),
        (0x60 => UTRLRSR: ReadWrite<u32>),
        (0x64 => _reserved4),
        (0x90 => UICCMD: ReadWrite<u32>),
        (0x94 => UCMDARG1: ReadWrite<u32>),
        (0x98 => UCMDARG2: ReadWrite<u32>),
        (0x9c => UCMDARG3: ReadWrite<u32>),
        (0xa0 => @END),
    }
}

// ============================================================================
// Descriptors
// ============================================================================

/// UTP transfer request descriptor.
#[repr(C, align(1024))]
#[derive(Default)]
struct Utrd {
    /// Command type, data direction, interrupt.
    header: u32,
    _dw1: u32,
    /// Overall command status in bits 7:0.
    ocs: u32,
    _dw3: u32,
    ucdba: u32,
    ucdbau: u32,
    /// Response UPIU offset and length in dwords.
    rsp: u32,
    /// PRDT offset in dwords and entry count.
    prdt: u32,
}

#[repr(C)]
#[derive(Default, Clone, Copy)]
struct PrdtEntry {
    addr_lo: u32,
    addr_hi: u32,
    _reserved: u32,
    /// Byte count minus one.
    count: u32,
}

const UPIU_BYTES: usize = 64;

/// UTP command descriptor: command UPIU, response UPIU, PRDT.
#[repr(C, align(128))]
struct CmdDesc {
    cmd: [u8; UPIU_BYTES],
    rsp: [u8; UPIU_BYTES],
    prdt: [PrdtEntry; 1],
}

impl Default for CmdDesc {
    fn default() -> Self {
        Self {
            cmd: [0; UPIU_BYTES],
            rsp: [0; UPIU_BYTES],
            prdt: [PrdtEntry::default()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DataDir {
    None = 0,
    ToDevice = 1,
    FromDevice = 2,
}

fn cdb_rw10(opcode: u8, lba: u32, blocks: u16) -> [u8; 16] {
    let mut cdb = [0u8; 16];
    cdb[0] = opcode;
    cdb[2..6].copy_from_slice(&lba.to_be_bytes());
    cdb[7..9].copy_from_slice(&blocks.to_be_bytes());
    cdb
}

fn cdb_read_capacity10() -> [u8; 16] {
    let mut cdb = [0u8; 16];
    cdb[0] = SCSI_READ_CAPACITY10;
    cdb
}

/// Build a command UPIU.
fn command_upiu(lun: u8, tag: u8, dir: DataDir, len: u32, cdb: &[u8; 16]) -> [u8; UPIU_BYTES] {
    let mut upiu = [0u8; UPIU_BYTES];
    upiu[0] = UPIU_COMMAND;
    upiu[1] = match dir {
        DataDir::None => 0,
        DataDir::ToDevice => UPIU_FLAG_WRITE,
        DataDir::FromDevice => UPIU_FLAG_READ,
    };
    upiu[2] = lun;
    upiu[3] = tag;
    upiu[12..16].copy_from_slice(&len.to_be_bytes());
    upiu[16..32].copy_from_slice(cdb);
    upiu
}

/// Decode `READ CAPACITY(10)` data into (block count, block size).
fn parse_capacity(data: &[u8; 8]) -> Result<(u64, u32)> {
    let last_lba = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
    let block_len = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    if block_len == 0 || !block_len.is_power_of_two() {
        log::error!("ufs: bad block length {}", block_len);
        return Err(Error::Io);
    }
    Ok((last_lba as u64 + 1, block_len))
}

// ============================================================================
// Host controller
// ============================================================================

pub struct Ufs<T> {
    regs: MmioDerefWrapper<UfsRegs>,
    timer: T,
    utrd: Box<Utrd>,
    ucd: Box<CmdDesc>,
    lun: u8,
    tag: u8,
    block_size: u32,
    block_count: u64,
}

impl<T: Timer> Ufs<T> {
    /// # Safety
    /// `base` must be the UFS host controller aperture.
    pub unsafe fn new(base: usize, timer: T) -> Self {
        Self {
            // SAFETY: guaranteed by the caller.
            regs: unsafe { MmioDerefWrapper::new(base) },
            timer,
            utrd: Box::default(),
            ucd: Box::default(),
            lun: 0,
            tag: 0,
            block_size: 0,
            block_count: 0,
        }
    }

    /// Enable the controller, start the link and size the boot LUN.
    pub fn init(&mut self) -> Result<()> {
        self.enable_host()?;
        self.link_startup()?;

        if !self.regs.HCS.is_set(HCS::DP) {
            log::error!("ufs: no device present");
            return Err(Error::InitFailed);
        }

        let list = addr_of!(*self.utrd) as u64;
        self.regs.UTRLBA.set(list as u32);
        self.regs.UTRLBAU.set((list >> 32) as u32);
        wait_for(&self.timer, HCE_TIMEOUT_US, || self.regs.HCS.is_set(HCS::UTRLRDY))?;
        self.regs.UTRLRSR.set(1);

        self.read_capacity()?;
        log::info!(
            "ufs: {} blocks of {} bytes",
            self.block_count,
            self.block_size
        );
        Ok(())
    }

    fn enable_host(&self) -> Result<()> {
        if self.regs.HCE.is_set(HCE::ENABLE) {
            self.regs.HCE.write(HCE::ENABLE::CLEAR);
            wait_for(&self.timer, HCE_TIMEOUT_US, || !self.regs.HCE.is_set(HCE::ENABLE))?;
        }
        self.regs.HCE.write(HCE::ENABLE::SET);
        wait_for(&self.timer, HCE_TIMEOUT_US, || self.regs.HCE.is_set(HCE::ENABLE))
            .inspect_err(|_| log::error!("ufs: host controller enable timed out"))
    }

    fn uic_cmd(&self, cmd: u32, arg1: u32, arg2: u32, arg3: u32) -> Result<u32> {
        wait_for(&self.timer, UIC_TIMEOUT_US, || self.regs.HCS.is_set(HCS::UCRDY))?;
        self.regs.IS.write(IS::UCCS::SET);
        self.regs.UCMDARG1.set(arg1);
        self.regs.UCMDARG2.set(arg2);
        self.regs.UCMDARG3.set(arg3);
        self.regs.UICCMD.set(cmd);
        wait_for(&self.timer, UIC_TIMEOUT_US, || self.regs.IS.is_set(IS::UCCS))?;
        self.regs.IS.write(IS::UCCS::SET);
        Ok(self.regs.UCMDARG2.get() & 0xFF)
    }

    fn link_startup(&self) -> Result<()> {
        match self.uic_cmd(DME_LINKSTARTUP, 0, 0, 0) {
            Ok(0) => Ok(()),
            Ok(code) => {
                log::error!("ufs: link startup failed, result {:#x}", code);
                Err(Error::InitFailed)
            }
            Err(e) => {
                log::error!("ufs: link startup: {}", e);
                Err(e)
            }
        }
    }

    fn prepare(&mut self, dir: DataDir, cdb: &[u8; 16], buf: Option<(u64, usize)>) {
        self.tag = self.tag.wrapping_add(1);
        let len = buf.map_or(0, |(_, len)| len);

        *self.ucd = CmdDesc::default();
        self.ucd.cmd = command_upiu(self.lun, self.tag, dir, len as u32, cdb);
        let prdt_len = match buf {
            Some((addr, len)) => {
                self.ucd.prdt[0] = PrdtEntry {
                    addr_lo: (addr as u32).to_le(),
                    addr_hi: ((addr >> 32) as u32).to_le(),
                    _reserved: 0,
                    count: (len as u32 - 1).to_le(),
                };
                1
            }
            None => 0,
        };

        let ucd = addr_of!(*self.ucd) as u64;
        const RSP_OFF_DW: u32 = (UPIU_BYTES / 4) as u32;
        const PRDT_OFF_DW: u32 = (2 * UPIU_BYTES / 4) as u32;
        *self.utrd = Utrd {
            header: ((1u32 << 28) | ((dir as u32) << 25)).to_le(),
            ocs: (OCS_INVALID as u32).to_le(),
            ucdba: (ucd as u32).to_le(),
            ucdbau: ((ucd >> 32) as u32).to_le(),
            rsp: ((RSP_OFF_DW << 16) | RSP_OFF_DW).to_le(),
            prdt: ((PRDT_OFF_DW << 16) | prdt_len).to_le(),
            ..Utrd::default()
        };
    }

    /// Status of the last completed request.
    fn completion_status(&self) -> Result<()> {
        // SAFETY: the descriptor is owned memory the controller writes back.
        let ocs = u32::from_le(unsafe { read_volatile(addr_of!(self.utrd.ocs)) }) as u8;
        if ocs != OCS_SUCCESS {
            log::error!("ufs: request failed, OCS {:#x}", ocs);
            return Err(Error::Io);
        }
        let rsp = &self.ucd.rsp;
        if rsp[0] != UPIU_RESPONSE || rsp[3] != self.tag {
            log::error!("ufs: unexpected response UPIU {:#x} tag {}", rsp[0], rsp[3]);
            return Err(Error::Io);
        }
        // Response, then SCSI status.
        if rsp[6] != 0 || rsp[7] != 0 {
            log::error!("ufs: command failed, response {:#x} status {:#x}", rsp[6], rsp[7]);
            return Err(Error::Io);
        }
        Ok(())
    }

    /// Ring the doorbell for slot 0 and wait for the controller to clear it.
    fn ring_and_wait(&mut self) -> Result<()> {
        cache::clean_dcache_range(addr_of!(*self.utrd) as usize, core::mem::size_of::<Utrd>());
        cache::clean_invalidate_dcache_range(
            addr_of!(*self.ucd) as usize,
            core::mem::size_of::<CmdDesc>(),
        );

        self.regs.IS.write(IS::UTRCS::SET);
        self.regs.UTRLDBR.set(1);
        let res = wait_for(&self.timer, XFER_TIMEOUT_US, || self.regs.UTRLDBR.get() & 1 == 0);
        if res.is_err() {
            log::error!("ufs: transfer request timed out");
            self.regs.UTRLCLR.set(!1);
            return res;
        }
        self.regs.IS.write(IS::UTRCS::SET);

        cache::invalidate_dcache_range(addr_of_mut!(*self.utrd) as usize, core::mem::size_of::<Utrd>());
        cache::invalidate_dcache_range(
            addr_of_mut!(*self.ucd) as usize,
            core::mem::size_of::<CmdDesc>(),
        );
        self.completion_status()
    }

    fn read_capacity(&mut self) -> Result<()> {
        let mut data = [0u8; 8];
        let addr = data.as_mut_ptr() as u64;
        self.prepare(DataDir::FromDevice, &cdb_read_capacity10(), Some((addr, data.len())));
        cache::clean_invalidate_dcache_range(addr as usize, data.len());
        self.ring_and_wait()?;
        cache::invalidate_dcache_range(addr as usize, data.len());
        (self.block_count, self.block_size) = parse_capacity(&data)?;
        Ok(())
    }

    fn check_range(&self, lba: u64, len: usize) -> Result<u64> {
        if self.block_size == 0 {
            return Err(Error::NotInitialized);
        }
        let bs = self.block_size as usize;
        if len % bs != 0 {
            return Err(Error::Invalid);
        }
        let blocks = (len / bs) as u64;
        if lba.checked_add(blocks).is_none_or(|end| end > self.block_count) {
            log::error!("ufs: lba {} + {} beyond the device", lba, blocks);
            return Err(Error::Invalid);
        }
        if lba + blocks > u32::MAX as u64 {
            return Err(Error::NotSupported);
        }
        Ok(blocks)
    }

    fn blocks_per_command(&self) -> usize {
        (PRDT_MAX_BYTES / self.block_size as usize).min(u16::MAX as usize)
    }
}

impl<T: Timer> BlockDevice for Ufs<T> {
    fn block_size(&self) -> usize {
        self.block_size as usize
    }

    fn block_count(&self) -> u64 {
        self.block_count
    }

    fn read_blocks(&mut self, lba: u64, buf: &mut [u8]) -> Result<()> {
        self.check_range(lba, buf.len())?;
        let chunk = self.blocks_per_command() * self.block_size as usize;
        let mut lba = lba;
        for part in buf.chunks_mut(chunk) {
            let blocks = (part.len() / self.block_size as usize) as u16;
            let addr = part.as_mut_ptr() as u64;
            self.prepare(
                DataDir::FromDevice,
                &cdb_rw10(SCSI_READ10, lba as u32, blocks),
                Some((addr, part.len())),
            );
            cache::clean_invalidate_dcache_range(addr as usize, part.len());
            self.ring_and_wait()?;
            cache::invalidate_dcache_range(addr as usize, part.len());
            lba += blocks as u64;
        }
        Ok(())
    }

    fn write_blocks(&mut self, lba: u64, buf: &[u8]) -> Result<()> {
        self.check_range(lba, buf.len())?;
        let chunk = self.blocks_per_command() * self.block_size as usize;
        let mut lba = lba;
        for part in buf.chunks(chunk) {
            let blocks = (part.len() / self.block_size as usize) as u16;
            let addr = part.as_ptr() as u64;
            self.prepare(
                DataDir::ToDevice,
                &cdb_rw10(SCSI_WRITE10, lba as u32, blocks),
                Some((addr, part.len())),
            );
            cache::clean_dcache_range(addr as usize, part.len());
            self.ring_and_wait()?;
            lba += blocks as u64;
        }
        Ok(())
    }
}

// ============================================================================
// Boot device
// ============================================================================

static UFS: Mutex<Option<Ufs<TimerUs>>> = Mutex::new(None);

/// Handle to the UFS boot device opened by [`ufs_bdev_open`].
pub struct UfsBlockDevice {
    block_size: usize,
    block_count: u64,
}

/// Open the UFS boot device, initializing the controller on first use or
/// when `reinit` is set.
pub fn ufs_bdev_open(reinit: bool) -> Result<UfsBlockDevice> {
    let mut slot = UFS.lock();
    if reinit || slot.is_none() {
        // SAFETY: fixed apertures from the address map.
        let mut ufs = unsafe { Ufs::new(UFSHC_BASE, TimerUs::new(TMRUS_BASE)) };
        ufs.init()?;
        *slot = Some(ufs);
    }
    let ufs = slot.as_ref().ok_or(Error::NotInitialized)?;
    Ok(UfsBlockDevice {
        block_size: ufs.block_size(),
        block_count: ufs.block_count(),
    })
}

impl BlockDevice for UfsBlockDevice {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn block_count(&self) -> u64 {
        self.block_count
    }

    fn read_blocks(&mut self, lba: u64, buf: &mut [u8]) -> Result<()> {
        UFS.lock().as_mut().ok_or(Error::NotInitialized)?.read_blocks(lba, buf)
    }

    fn write_blocks(&mut self, lba: u64, buf: &[u8]) -> Result<()> {
        UFS.lock().as_mut().ok_or(Error::NotInitialized)?.write_blocks(lba, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mmio::fake::FakeRegs;
    use crate::timer::fake::FakeTimer;

    fn host(mem: &FakeRegs) -> Ufs<FakeTimer> {
        unsafe { Ufs::new(mem.base(), FakeTimer::default()) }
    }

    #[test]
    fn descriptor_layouts() {
        assert_eq!(core::mem::size_of::<PrdtEntry>(), 16);
        assert_eq!(core::mem::align_of::<Utrd>(), 1024);
        assert_eq!(core::mem::offset_of!(CmdDesc, rsp), 64);
        assert_eq!(core::mem::offset_of!(CmdDesc, prdt), 128);
    }

    #[test]
    fn read10_cdb_and_upiu() {
        let cdb = cdb_rw10(SCSI_READ10, 0x0102_0304, 8);
        assert_eq!(&cdb[..10], &[0x28, 0, 1, 2, 3, 4, 0, 0, 8, 0]);

        let upiu = command_upiu(0, 7, DataDir::FromDevice, 0x8000, &cdb);
        assert_eq!(&upiu[..4], &[0x01, 0x40, 0, 7]);
        assert_eq!(&upiu[12..16], &[0, 0, 0x80, 0]);
        assert_eq!(upiu[16], 0x28);
    }

    #[test]
    fn capacity_decoding() {
        assert_eq!(parse_capacity(&[0, 0, 0x0f, 0xff, 0, 0, 0x10, 0]), Ok((0x1000, 4096)));
        assert_eq!(parse_capacity(&[0, 0, 0, 0, 0, 0, 0, 0]), Err(Error::Io));
        assert_eq!(parse_capacity(&[0, 0, 0, 0, 0, 0, 3, 0]), Err(Error::Io));
    }

    #[test]
    fn prepare_fills_utrd_and_prdt() {
        let mem = FakeRegs::new(0xa0);
        let mut ufs = host(&mem);
        ufs.prepare(
            DataDir::FromDevice,
            &cdb_rw10(SCSI_READ10, 0, 1),
            Some((0x1_8000_0000, 4096)),
        );
        assert_eq!(ufs.utrd.header, (1 << 28) | (2 << 25));
        assert_eq!(ufs.utrd.ocs, 0xF);
        assert_eq!(ufs.utrd.rsp, (16 << 16) | 16);
        assert_eq!(ufs.utrd.prdt, (32 << 16) | 1);
        assert_eq!(ufs.ucd.prdt[0].addr_hi, 1);
        assert_eq!(ufs.ucd.prdt[0].count, 4095);
        assert_eq!(ufs.ucd.cmd[3], ufs.tag);
    }

    #[test]
    fn completion_status_checks_ocs_and_response() {
        let mem = FakeRegs::new(0xa0);
        let mut ufs = host(&mem);
        ufs.prepare(DataDir::None, &cdb_read_capacity10(), None);
        assert_eq!(ufs.completion_status(), Err(Error::Io));

        ufs.utrd.ocs = 0;
        ufs.ucd.rsp[0] = UPIU_RESPONSE;
        ufs.ucd.rsp[3] = ufs.tag;
        assert_eq!(ufs.completion_status(), Ok(()));

        // CHECK CONDITION
        ufs.ucd.rsp[7] = 0x02;
        assert_eq!(ufs.completion_status(), Err(Error::Io));
    }

    #[test]
    fn init_runs_link_startup_then_times_out_on_doorbell() {
        let mem = FakeRegs::new(0xa0);
        mem.write(0x30, 0b1011);
        mem.write(0x20, 1 << 10);
        let mut ufs = host(&mem);

        assert_eq!(ufs.init(), Err(Error::Timeout));
        assert_eq!(mem.read(0x34), 1);
        assert_eq!(mem.read(0x90), DME_LINKSTARTUP);
        assert_eq!(mem.read(0x60), 1);
        assert_eq!(mem.read(0x50), addr_of!(*ufs.utrd) as u32);
    }

    #[test]
    fn missing_device_fails_init() {
        let mem = FakeRegs::new(0xa0);
        mem.write(0x30, 0b1000);
        mem.write(0x20, 1 << 10);
        let mut ufs = host(&mem);
        assert_eq!(ufs.init(), Err(Error::InitFailed));
        assert_eq!(mem.read(0x60), 0);
    }

    #[test]
    fn uic_timeout_without_completion() {
        let mem = FakeRegs::new(0xa0);
        mem.write(0x30, 0b1000);
        let mut ufs = host(&mem);
        assert_eq!(ufs.init(), Err(Error::Timeout));
    }

    #[test]
    fn io_requires_capacity_and_whole_blocks() {
        let mem = FakeRegs::new(0xa0);
        let mut ufs = host(&mem);
        let mut buf = [0u8; 4096];
        assert_eq!(ufs.read_blocks(0, &mut buf), Err(Error::NotInitialized));

        ufs.block_size = 4096;
        ufs.block_count = 4;
        assert_eq!(ufs.read_blocks(0, &mut buf[..100]), Err(Error::Invalid));
        assert_eq!(ufs.write_blocks(4, &buf), Err(Error::Invalid));
        assert_eq!(ufs.blocks_per_command(), 64);
    }
}
