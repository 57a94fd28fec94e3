//! Kernel, ramdisk and DTB staging.
//!
//! The boot image is read from storage (or handed over in memory), the
//! kernel is copied or decompressed to its load address, the ramdisks are
//! moved to the ramdisk carveout and the kernel DTB is patched with the
//! bootloader's view of the system.

use crate::bootimg::{
    BootHeader, Compression, VENDOR_BOOT_HEADER_SIZE, VendorBootImgHeader, is_compressed_content,
};
use crate::config::LoaderConfig;
use crate::dtb::DeviceTree;
use crate::dtb_update::{
    DebugConsole, DtNodeInfo, LinuxBootHelper, MacAddrType, MemBlock, OdmDataParam, SecureOs,
    update_dtb,
};
use alloc::string::String;
use alloc::vec::Vec;
use arch_aarch64::smc::SecureMonitor;
use bootcore::{Error, Result, round_up};

/// Images the partition loader knows how to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryType {
    Kernel,
    Recovery,
    KernelDtb,
    VendorBoot,
}

/// Which boot image to start and where it comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelBin {
    pub bin_type: BinaryType,
    pub load_from_storage: bool,
}

/// Fetches whole images into memory.
pub trait BinaryLoader {
    /// Load `bin` and return the image in place.
    fn load_binary(&mut self, bin: BinaryType) -> Result<&'static [u8]>;

    /// A kernel DTB an earlier stage already put in memory.
    fn preloaded_dtb(&self) -> Option<&'static [u8]> {
        None
    }
}

/// Access to physical memory at fixed load addresses.
pub trait PhysMemory {
    /// Copy `data` to physical address `dest`.
    fn write(&mut self, dest: u64, data: &[u8]) -> Result<()>;

    /// Writable window of `len` bytes at `dest`.
    fn region_mut(&mut self, dest: u64, len: usize) -> Result<&mut [u8]>;
}

/// Physical memory accessed directly; the MMU is off or identity mapped.
pub struct DirectMemory {
    _private: (),
}

impl DirectMemory {
    /// # Safety
    /// Every destination handed to this instance must be unused RAM.
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl PhysMemory for DirectMemory {
    fn write(&mut self, dest: u64, data: &[u8]) -> Result<()> {
        if dest == 0 {
            return Err(Error::Invalid);
        }
        // SAFETY: `new` requires `dest` to be free RAM; regions may overlap
        // the source so this is a memmove.
        unsafe { core::ptr::copy(data.as_ptr(), dest as usize as *mut u8, data.len()) };
        Ok(())
    }

    fn region_mut(&mut self, dest: u64, len: usize) -> Result<&mut [u8]> {
        if dest == 0 {
            return Err(Error::Invalid);
        }
        // SAFETY: as above.
        Ok(unsafe { core::slice::from_raw_parts_mut(dest as usize as *mut u8, len) })
    }
}

/// Inflates compressed kernels.
pub trait Decompressor {
    /// Decompress `src` into `dst`, returning the decompressed size.
    fn decompress(&mut self, kind: Compression, src: &[u8], dst: &mut [u8]) -> Result<usize>;
}

/// Images handed to the verified boot hook.
pub struct VerifyInput<'a> {
    pub boot: &'a [u8],
    pub vendor_boot: Option<&'a [u8]>,
    pub kernel_dtb: &'a [u8],
}

/// Optional hooks into the load sequence.
#[derive(Default)]
pub struct LoadCallbacks<'a> {
    /// Called once every image is in memory, before anything is moved.
    pub verify_boot: Option<&'a mut dyn FnMut(&VerifyInput<'_>)>,
    pub decompressor: Option<&'a mut dyn Decompressor>,
}

/// Everything the kernel needs at the hand-off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinuxImage {
    pub kernel_entry: u64,
    pub kernel_size: usize,
    /// Patched and flattened kernel DTB.
    pub dtb: Vec<u8>,
    pub ramdisk: MemBlock,
    /// Command line carried by the boot image(s).
    pub cmdline: String,
}

/// Board services used while staging the kernel.
pub struct KernelLoader<'a, L: ?Sized, P: ?Sized, H: ?Sized, M: ?Sized> {
    pub binaries: &'a mut L,
    pub memory: &'a mut P,
    pub helper: &'a H,
    pub monitor: &'a mut M,
    pub config: LoaderConfig,
}

struct Images {
    boot: &'static [u8],
    vendor_boot: Option<&'static [u8]>,
}

impl<L, P, H, M> KernelLoader<'_, L, P, H, M>
where
    L: BinaryLoader + ?Sized,
    P: PhysMemory + ?Sized,
    H: LinuxBootHelper + ?Sized,
    M: SecureMonitor + ?Sized,
{
    /// Stage kernel, ramdisk and DTB for `kernel`.
    ///
    /// `data` is the boot image when it is not loaded from storage.
    pub fn load_kernel_and_dtb(
        &mut self,
        kernel: &KernelBin,
        callbacks: LoadCallbacks<'_>,
        data: Option<&'static [u8]>,
    ) -> Result<LinuxImage> {
        let images = self.load_images(kernel, data)?;

        // The DTB comes early since verified boot covers it.
        let dtb = match self.binaries.preloaded_dtb() {
            Some(dtb) => dtb,
            None => self.binaries.load_binary(BinaryType::KernelDtb).inspect_err(|_| {
                log::error!("Kernel-dtb loading failed");
            })?,
        };
        log::info!("Kernel DTB @ {:p}", dtb.as_ptr());

        let LoadCallbacks { verify_boot, decompressor } = callbacks;
        if let Some(verify) = verify_boot {
            verify(&VerifyInput {
                boot: images.boot,
                vendor_boot: images.vendor_boot,
                kernel_dtb: dtb,
            });
        }

        let hdr = BootHeader::parse(images.boot)?;
        let vndhdr = images.vendor_boot.map(VendorBootImgHeader::parse).transpose()?;
        let page_size = match &vndhdr {
            Some(v) => v.page_size,
            None => hdr.page_size(),
        };
        if page_size == 0 {
            log::error!("boot image page size is zero");
            return Err(Error::Invalid);
        }

        let (kernel_entry, kernel_size) = self
            .extract_kernel(&hdr, images.boot, page_size, decompressor)
            .inspect_err(|e| log::error!("Error {} loading the kernel", e))?;

        let (ramdisk, cmdline) = self
            .extract_ramdisk(&hdr, &images, vndhdr.as_ref(), page_size)
            .inspect_err(|e| log::error!("Error {} loading the ramdisk", e))?;

        let dtb = self
            .extract_kernel_dtb(dtb, ramdisk, &cmdline)
            .inspect_err(|e| log::error!("Error {} loading the kernel DTB", e))?;

        log::info!("load_kernel_and_dtb: Done");
        Ok(LinuxImage { kernel_entry, kernel_size, dtb, ramdisk, cmdline })
    }

    fn load_images(&mut self, kernel: &KernelBin, data: Option<&'static [u8]>) -> Result<Images> {
        if !kernel.load_from_storage {
            log::info!("Loading kernel/boot.img from memory ...");
            let Some(boot) = data else {
                log::error!("Found no kernel in memory");
                return Err(Error::Invalid);
            };
            if self.config.vendor_boot {
                log::error!("in-memory boot.img cannot carry a vendor_boot.img");
                return Err(Error::NotSupported);
            }
            return Ok(Images { boot, vendor_boot: None });
        }

        log::info!("Loading kernel/boot.img/vendor_boot.img from storage ...");
        // vendor_boot first: its header locates the kernel and ramdisk in boot.
        let vendor_boot = if self.config.vendor_boot {
            let vnd = self.binaries.load_binary(BinaryType::VendorBoot).inspect_err(|_| {
                log::error!("vendor_boot.img loading failed");
            })?;
            Some(vnd)
        } else {
            None
        };
        let boot = self.binaries.load_binary(kernel.bin_type).inspect_err(|_| {
            log::error!("boot.img loading failed");
        })?;
        Ok(Images { boot, vendor_boot })
    }

    fn extract_kernel(
        &mut self,
        hdr: &BootHeader,
        boot: &[u8],
        page_size: u32,
        decompressor: Option<&mut dyn Decompressor>,
    ) -> Result<(u64, usize)> {
        let offset = page_size as usize;
        let size = hdr.kernel_size() as usize;
        let image = boot.get(offset..offset + size).ok_or(Error::BufferTooSmall)?;
        let load = self.config.linux_load_address;

        match is_compressed_content(image) {
            None => {
                log::info!(
                    "Copying kernel image ({} bytes) from {:p} to {:#x}",
                    size,
                    image.as_ptr(),
                    load
                );
                self.memory.write(load, image)?;
                Ok((load, size))
            }
            Some(kind) => {
                log::info!(
                    "Decompressing kernel image ({} bytes) from {:p} to {:#x}",
                    size,
                    image.as_ptr(),
                    load
                );
                let Some(decomp) = decompressor else {
                    log::error!("no {:?} decompressor available", kind);
                    return Err(Error::NotSupported);
                };
                let dst = self.memory.region_mut(load, self.config.max_kernel_image_size)?;
                let out = decomp.decompress(kind, image, dst)?;
                Ok((load, out))
            }
        }
    }

    fn extract_ramdisk(
        &mut self,
        hdr: &BootHeader,
        images: &Images,
        vndhdr: Option<&VendorBootImgHeader>,
        page_size: u32,
    ) -> Result<(MemBlock, String)> {
        let page = page_size as u64;
        let offset = round_up(page + hdr.kernel_size() as u64, page) as usize;
        let size = hdr.ramdisk_size() as usize;
        let ramdisk = images
            .boot
            .get(offset..offset + size)
            .ok_or(Error::BufferTooSmall)?;
        let load = self.config.ramdisk_address;

        if ramdisk.as_ptr() as u64 != load {
            log::info!(
                "Move boot.img ramdisk (len: {}) from {:p} to {:#x}",
                size,
                ramdisk.as_ptr(),
                load
            );
            self.memory.write(load, ramdisk)?;
        }

        let mut cmdline = String::from_utf8_lossy(hdr.cmdline()).into_owned();
        let mut total = size as u64;

        if let (Some(vnd), Some(vendor_boot)) = (vndhdr, images.vendor_boot) {
            let v_offset = round_up(VENDOR_BOOT_HEADER_SIZE as u64, page) as usize;
            let v_size = vnd.vendor_ramdisk_size as usize;
            let v_ramdisk = vendor_boot
                .get(v_offset..v_offset + v_size)
                .ok_or(Error::BufferTooSmall)?;
            // The vendor ramdisk goes right after the generic one.
            let v_load = round_up(load + size as u64, page);
            log::info!(
                "Move vendor_boot.img ramdisk (len: {}) from {:p} to {:#x}",
                v_size,
                v_ramdisk.as_ptr(),
                v_load
            );
            self.memory.write(v_load, v_ramdisk)?;

            cmdline.push_str(&String::from_utf8_lossy(vnd.cmdline()));
            total = round_up(size as u64, page) + v_size as u64;
        }

        log::info!("Loaded cmdline from bootimage: {}", cmdline);
        Ok((MemBlock { base: load, size: total }, cmdline))
    }

    fn extract_kernel_dtb(
        &mut self,
        blob: &[u8],
        ramdisk: MemBlock,
        cmdline: &str,
    ) -> Result<Vec<u8>> {
        let mut tree = DeviceTree::from_blob(blob)?;
        let helper = WithRamdisk {
            inner: self.helper,
            ramdisk: (ramdisk.size != 0).then_some(ramdisk),
        };
        update_dtb(&mut tree, &helper, &mut *self.monitor, cmdline)?;
        tree.to_blob_with_space(self.config.dtb_extra_space, self.config.dtb_max_size)
    }
}

/// Board helper reporting the ramdisk this loader placed.
struct WithRamdisk<'a, H: ?Sized> {
    inner: &'a H,
    ramdisk: Option<MemBlock>,
}

impl<H: LinuxBootHelper + ?Sized> LinuxBootHelper for WithRamdisk<'_, H> {
    fn memory_block(&self, idx: usize) -> Result<MemBlock> {
        self.inner.memory_block(idx)
    }
    fn initrd(&self) -> Option<MemBlock> {
        self.ramdisk
    }
    fn bpmp_carveout(&self) -> Result<MemBlock> {
        self.inner.bpmp_carveout()
    }
    fn debug_console(&self) -> Result<DebugConsole> {
        self.inner.debug_console()
    }
    fn secure_os(&self) -> Result<SecureOs> {
        self.inner.secure_os()
    }
    fn serial_number(&self) -> Result<String> {
        self.inner.serial_number()
    }
    fn odmdata(&self) -> u32 {
        self.inner.odmdata()
    }
    fn odmdata_params(&self) -> Result<&[OdmDataParam]> {
        self.inner.odmdata_params()
    }
    fn mac_address(&self, kind: MacAddrType) -> Result<String> {
        self.inner.mac_address(kind)
    }
    fn nct_spec(&self) -> Result<(String, String)> {
        self.inner.nct_spec()
    }
    fn extra_nodes(&self) -> &[DtNodeInfo] {
        self.inner.extra_nodes()
    }
    fn prepare_cmdline(&self, dtb_cmdline: &str, bootimg_cmdline: &str) -> String {
        self.inner.prepare_cmdline(dtb_cmdline, bootimg_cmdline)
    }
}
