//! Boot flow: bring the board up far enough to load Linux from UFS.
//!
//! The sequence is console and logging, GPIO controllers, the DMA engine
//! behind the C library hooks, the display when the board has one, the
//! UFS boot device and finally kernel, ramdisk and DTB staging.

use crate::addressmap::{CAR_BASE, SDRAM_BASE, TMRUS_BASE};
use crate::car::Car;
use crate::console::{self, ConsoleInterface};
use crate::fastboot::{self, BlockPartition, PartitionExtent};
use crate::gpcdma::{DmaEngines, DmaType};
use crate::gpio;
use crate::nvdisp::{DisplayHub, DisplayOutType, DisplayPdata, EdidSource, Nvdisp, OutputOps};
use crate::odmdata::{OdmData, OdmDataParam, T186_PARAMS};
use crate::timer::TimerUs;
use crate::ufs;
use alloc::boxed::Box;
use alloc::string::String;
use arch_aarch64::cpu::Midr;
use arch_aarch64::linux::LinuxEntry;
use arch_aarch64::smc::Smc;
use bootcore::{BlockDevice, Error, Result};
use linuxboot::dtb_update::{DebugConsole, SecureOs};
use linuxboot::loader::{DirectMemory, LoadCallbacks};
use linuxboot::{
    BinaryLoader, BinaryType, KernelBin, KernelLoader, LinuxBootHelper, LoaderConfig, MemBlock,
    PhysMemory,
};
use log::LevelFilter;

// ============================================================================
// Board description
// ============================================================================

/// Extents of the boot partitions on the UFS boot LUN, in 4 KiB blocks.
#[cfg(all(not(feature = "ab-slots"), not(feature = "sane-partitions")))]
pub const T186_LAYOUT: [PartitionExtent; 4] = [
    extent("kernel", 0x2000, 0x4000),
    extent("kernel-dtb", 0x6000, 0x100),
    extent("SOS", 0x6100, 0x4000),
    extent("vendor_boot", 0xa100, 0x4000),
];

#[cfg(all(not(feature = "ab-slots"), feature = "sane-partitions"))]
pub const T186_LAYOUT: [PartitionExtent; 4] = [
    extent("boot", 0x2000, 0x4000),
    extent("dtb", 0x6000, 0x100),
    extent("recovery", 0x6100, 0x4000),
    extent("vendor_boot", 0xa100, 0x4000),
];

#[cfg(all(feature = "ab-slots", not(feature = "sane-partitions")))]
pub const T186_LAYOUT: [PartitionExtent; 8] = [
    extent("kernel_a", 0x2000, 0x4000),
    extent("kernel-dtb_a", 0x6000, 0x100),
    extent("SOS_a", 0x6100, 0x4000),
    extent("vendor_boot_a", 0xa100, 0x4000),
    extent("kernel_b", 0xe100, 0x4000),
    extent("kernel-dtb_b", 0x12100, 0x100),
    extent("SOS_b", 0x12200, 0x4000),
    extent("vendor_boot_b", 0x16200, 0x4000),
];

#[cfg(all(feature = "ab-slots", feature = "sane-partitions"))]
pub const T186_LAYOUT: [PartitionExtent; 8] = [
    extent("boot_a", 0x2000, 0x4000),
    extent("dtb_a", 0x6000, 0x100),
    extent("recovery_a", 0x6100, 0x4000),
    extent("vendor_boot_a", 0xa100, 0x4000),
    extent("boot_b", 0xe100, 0x4000),
    extent("dtb_b", 0x12100, 0x100),
    extent("recovery_b", 0x12200, 0x4000),
    extent("vendor_boot_b", 0x16200, 0x4000),
];

const fn extent(name: &'static str, start_lba: u64, num_lba: u64) -> PartitionExtent {
    PartitionExtent {
        name,
        start_lba,
        num_lba,
    }
}

/// DRAM handed to the kernel.
pub const T186_MEMORY: [MemBlock; 1] = [MemBlock {
    base: SDRAM_BASE,
    size: 0x7000_0000,
}];

/// Fixed parameters of one board.
pub struct BoardConfig {
    pub console: ConsoleInterface,
    pub console_instance: u32,
    /// Image started: the kernel or the recovery kernel.
    pub kernel: BinaryType,
    /// `""`, `"_a"` or `"_b"`.
    pub slot_suffix: &'static str,
    pub layout: &'static [PartitionExtent],
    pub memory: &'static [MemBlock],
    pub bpmp_carveout: MemBlock,
    /// Free DRAM partitions are read into.
    pub staging: MemBlock,
    /// Final DTB location.
    pub dtb_address: u64,
    pub odmdata: u32,
    pub odmdata_params: &'static [OdmDataParam],
    pub serial_number: &'static str,
    pub secure_os: SecureOs,
    pub debug_console: DebugConsole,
    /// Copies and fills from this size up go through the GPC-DMA.
    pub dma_clib_threshold: usize,
    pub loader: LoaderConfig,
}

impl BoardConfig {
    pub const fn t186() -> Self {
        Self {
            console: ConsoleInterface::Uart,
            console_instance: 0,
            kernel: BinaryType::Kernel,
            slot_suffix: if cfg!(feature = "ab-slots") { "_a" } else { "" },
            layout: &T186_LAYOUT,
            memory: &T186_MEMORY,
            bpmp_carveout: MemBlock {
                base: 0xf000_0000,
                size: 0x20_0000,
            },
            staging: MemBlock {
                base: 0xa000_0000,
                size: 0x1000_0000,
            },
            dtb_address: 0x8480_0000,
            odmdata: 0x0009_0000,
            odmdata_params: &T186_PARAMS,
            serial_number: "0",
            secure_os: SecureOs::Trusty,
            debug_console: DebugConsole::Uart,
            dma_clib_threshold: 4096,
            loader: LoaderConfig::t186(),
        }
    }
}

/// Display head to light up during boot.
pub struct DisplaySetup {
    pub out_type: DisplayOutType,
    pub pdata: DisplayPdata,
    pub edid: Box<dyn EdidSource>,
    pub out_ops: Box<dyn OutputOps + Send>,
}

// ============================================================================
// Partition-backed image loading
// ============================================================================

/// Reads boot partitions whole into a staging area.
pub struct PartitionLoader<'d, D: ?Sized> {
    dev: &'d mut D,
    layout: &'static [PartitionExtent],
    slot_suffix: &'static str,
    staging: MemBlock,
}

impl<'d, D: BlockDevice + ?Sized> PartitionLoader<'d, D> {
    /// # Safety
    /// `staging` must be RAM nothing else uses until the kernel starts.
    pub unsafe fn new(
        dev: &'d mut D,
        layout: &'static [PartitionExtent],
        slot_suffix: &'static str,
        staging: MemBlock,
    ) -> Self {
        Self {
            dev,
            layout,
            slot_suffix,
            staging,
        }
    }

    fn fastboot_name(bin: BinaryType) -> &'static str {
        match bin {
            BinaryType::Kernel => "boot",
            BinaryType::Recovery => "recovery",
            BinaryType::KernelDtb => "dtb",
            BinaryType::VendorBoot => "vendor_boot",
        }
    }

    /// Partition holding `bin` for the active slot.
    pub fn resolve(&self, bin: BinaryType) -> Result<PartitionExtent> {
        let info = fastboot::get_partinfo(Self::fastboot_name(bin));
        let name = fastboot::get_tegra_part_name(self.slot_suffix, info.as_ref())
            .ok_or(Error::NotFound)?;
        self.layout
            .iter()
            .find(|e| e.name == name)
            .copied()
            .ok_or_else(|| {
                log::error!("partition {} not found", name);
                Error::NotFound
            })
    }
}

impl<D: BlockDevice + ?Sized> BinaryLoader for PartitionLoader<'_, D> {
    fn load_binary(&mut self, bin: BinaryType) -> Result<&'static [u8]> {
        let extent = self.resolve(bin)?;
        let mut part = BlockPartition::open(&mut *self.dev, extent)?;
        let size = part.size();
        if size > self.staging.size {
            log::error!("{} ({} bytes) does not fit the staging area", extent.name, size);
            return Err(Error::NoMemory);
        }
        // SAFETY: unused RAM handed over in `new`; each load takes a fresh
        // piece of it.
        let buf: &'static mut [u8] = unsafe {
            core::slice::from_raw_parts_mut(self.staging.base as usize as *mut u8, size as usize)
        };
        part.read(buf)?;
        self.staging.base += size;
        self.staging.size -= size;
        log::info!("Loaded {} ({} bytes) @ {:p}", extent.name, size, buf.as_ptr());
        Ok(buf)
    }
}

// ============================================================================
// Board facts for the kernel DTB
// ============================================================================

pub struct BoardHelper<'a> {
    board: &'a BoardConfig,
    odmdata: OdmData,
}

impl<'a> BoardHelper<'a> {
    pub fn new(board: &'a BoardConfig) -> Self {
        Self {
            board,
            odmdata: OdmData::new(board.odmdata, board.odmdata_params),
        }
    }
}

impl LinuxBootHelper for BoardHelper<'_> {
    fn memory_block(&self, idx: usize) -> Result<MemBlock> {
        Ok(self
            .board
            .memory
            .get(idx)
            .copied()
            .unwrap_or(MemBlock { base: 0, size: 0 }))
    }

    fn initrd(&self) -> Option<MemBlock> {
        None
    }

    fn bpmp_carveout(&self) -> Result<MemBlock> {
        Ok(self.board.bpmp_carveout)
    }

    fn debug_console(&self) -> Result<DebugConsole> {
        Ok(self.board.debug_console)
    }

    fn secure_os(&self) -> Result<SecureOs> {
        Ok(self.board.secure_os)
    }

    fn serial_number(&self) -> Result<String> {
        Ok(String::from(self.board.serial_number))
    }

    fn odmdata(&self) -> u32 {
        self.odmdata.get()
    }

    fn odmdata_params(&self) -> Result<&[OdmDataParam]> {
        self.odmdata.params()
    }
}

// ============================================================================
// Sequence
// ============================================================================

fn log_level() -> LevelFilter {
    if cfg!(feature = "debug") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

/// Bring the board up and stage Linux; returns where to jump.
///
/// The heap must be initialized.
pub fn run(board: &BoardConfig, display: Option<DisplaySetup>) -> Result<LinuxEntry> {
    console::register(board.console, board.console_instance)?;
    let console = Box::leak(Box::new(console::open()?));
    bootcore::logger::init(console, log_level());
    log::info!("tegraboot {}", env!("CARGO_PKG_VERSION"));
    log::info!(
        "{:?} core {} at EL{}",
        Midr::read().kind(),
        arch_aarch64::core_id(),
        arch_aarch64::current_el()
    );

    gpio::driver_init()?;

    // SAFETY: fixed apertures from the address map.
    let mut car = unsafe { Car::new(CAR_BASE, TimerUs::new(TMRUS_BASE)) };
    let mut dma = DmaEngines::new(unsafe { TimerUs::new(TMRUS_BASE) });
    dma.request(&mut car, DmaType::Gpc)?;
    dma.enable_clib_callbacks(DmaType::Gpc, board.dma_clib_threshold);

    if let Some(d) = display {
        let hub = DisplayHub::new();
        let DisplaySetup {
            out_type,
            pdata,
            mut edid,
            out_ops,
        } = d;
        // A dark screen is not fatal.
        match Nvdisp::init(
            out_type,
            &pdata,
            edid.as_mut(),
            Some(out_ops),
            &mut car,
            &hub,
            unsafe { TimerUs::new(TMRUS_BASE) },
        ) {
            Ok(disp) => {
                let (h, w) = disp.get_resolution();
                log::info!("display {}x{}", w, h);
            }
            Err(e) => log::warn!("display init failed: {}", e),
        }
    }

    let mut bdev = ufs::ufs_bdev_open(false).inspect_err(|e| {
        log::error!("UFS open failed: {}", e);
    })?;
    log::info!(
        "UFS: {} blocks of {} bytes",
        bdev.block_count(),
        bdev.block_size()
    );

    // SAFETY: the staging area is reserved for this by the board.
    let mut binaries =
        unsafe { PartitionLoader::new(&mut bdev, board.layout, board.slot_suffix, board.staging) };
    // SAFETY: the load addresses in `board.loader` are free DRAM.
    let mut memory = unsafe { DirectMemory::new() };
    let helper = BoardHelper::new(board);
    let mut monitor = Smc;

    let image = KernelLoader {
        binaries: &mut binaries,
        memory: &mut memory,
        helper: &helper,
        monitor: &mut monitor,
        config: board.loader,
    }
    .load_kernel_and_dtb(
        &KernelBin {
            bin_type: board.kernel,
            load_from_storage: true,
        },
        LoadCallbacks::default(),
        None,
    )?;

    let dst = memory.region_mut(board.dtb_address, image.dtb.len())?;
    dma.copy(&mut car, dst, &image.dtb)?;

    Ok(LinuxEntry {
        kernel: image.kernel_entry as usize,
        kernel_size: image.kernel_size,
        dtb: board.dtb_address as usize,
        dtb_size: image.dtb.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec;
    use std::vec::Vec;

    struct RamDisk(Vec<u8>);

    impl BlockDevice for RamDisk {
        fn block_size(&self) -> usize {
            512
        }
        fn block_count(&self) -> u64 {
            (self.0.len() / 512) as u64
        }
        fn read_blocks(&mut self, lba: u64, buf: &mut [u8]) -> Result<()> {
            let off = lba as usize * 512;
            buf.copy_from_slice(&self.0[off..off + buf.len()]);
            Ok(())
        }
        fn write_blocks(&mut self, _lba: u64, _buf: &[u8]) -> Result<()> {
            Err(Error::NotSupported)
        }
    }

    fn staging(len: usize) -> MemBlock {
        let mem = Box::leak(vec![0u8; len].into_boxed_slice());
        MemBlock {
            base: mem.as_mut_ptr() as u64,
            size: len as u64,
        }
    }

    #[test]
    fn resolves_through_the_fastboot_map() {
        let mut disk = RamDisk(vec![0; 512]);
        let board = BoardConfig::t186();
        let loader = unsafe { PartitionLoader::new(&mut disk, board.layout, board.slot_suffix, staging(0)) };
        let kernel = loader.resolve(BinaryType::Kernel).unwrap();
        assert_eq!(kernel.start_lba, 0x2000);
        assert_eq!(loader.resolve(BinaryType::KernelDtb).unwrap().num_lba, 0x100);
    }

    #[test]
    fn loads_partitions_back_to_back() {
        let board = BoardConfig::t186();
        let mut empty = RamDisk(vec![]);
        let names =
            unsafe { PartitionLoader::new(&mut empty, board.layout, board.slot_suffix, staging(0)) };
        let kernel = names.resolve(BinaryType::Kernel).unwrap().name;
        let dtb = names.resolve(BinaryType::KernelDtb).unwrap().name;
        let layout: &'static [PartitionExtent] =
            Box::leak(Box::new([extent(kernel, 1, 2), extent(dtb, 3, 1)]));

        let mut raw = vec![0u8; 512 * 4];
        raw[512] = 0x11;
        raw[3 * 512] = 0x22;
        let mut disk = RamDisk(raw);
        let area = staging(512 * 3);
        let mut loader = unsafe { PartitionLoader::new(&mut disk, layout, board.slot_suffix, area) };

        let boot = loader.load_binary(BinaryType::Kernel).unwrap();
        assert_eq!((boot.len(), boot[0]), (1024, 0x11));
        assert_eq!(boot.as_ptr() as u64, area.base);
        let dtb = loader.load_binary(BinaryType::KernelDtb).unwrap();
        assert_eq!(dtb[0], 0x22);
        assert_eq!(dtb.as_ptr() as u64, area.base + 1024);

        assert_eq!(loader.load_binary(BinaryType::Kernel), Err(Error::NoMemory));
        assert_eq!(loader.load_binary(BinaryType::Recovery), Err(Error::NotFound));
    }

    #[test]
    fn helper_reports_board_facts() {
        let board = BoardConfig::t186();
        let helper = BoardHelper::new(&board);
        assert_eq!(helper.memory_block(0).unwrap().base, SDRAM_BASE);
        assert_eq!(helper.memory_block(1).unwrap().size, 0);
        assert_eq!(helper.odmdata(), 0x0009_0000);
        assert_eq!(helper.odmdata_params().unwrap().len(), T186_PARAMS.len());
        assert_eq!(helper.secure_os(), Ok(SecureOs::Trusty));
        assert!(helper.initrd().is_none());
    }
}
