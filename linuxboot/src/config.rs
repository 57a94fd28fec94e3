//! Load addresses and limits for the kernel hand-off.

/// Where the loader places each image and how large the DTB may grow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Kernel `Image` destination and entry point.
    pub linux_load_address: u64,
    /// Generic ramdisk destination; the vendor ramdisk follows it.
    pub ramdisk_address: u64,
    /// Largest DTB the kernel carveout accepts.
    pub dtb_max_size: usize,
    /// Free bytes left in the DTB for the bootloader's nodes.
    pub dtb_extra_space: usize,
    /// Upper bound for a decompressed kernel.
    pub max_kernel_image_size: usize,
    /// boot.img uses header v3 and needs vendor_boot.img.
    pub vendor_boot: bool,
}

/// Maximum possible uncompressed kernel image size.
pub const MAX_KERNEL_IMAGE_SIZE: usize = 60 * 1024 * 1024;

/// Room reserved for nodes added after the kernel DTB is loaded.
pub const FDT_SIZE_BL_DT_NODES: usize = 4048 + 4048;

impl LoaderConfig {
    /// Memory layout used on T186 boards.
    pub const fn t186() -> Self {
        Self {
            linux_load_address: 0x8008_0000,
            ramdisk_address: 0x8520_0000,
            dtb_max_size: 0x40_0000,
            dtb_extra_space: FDT_SIZE_BL_DT_NODES,
            max_kernel_image_size: MAX_KERNEL_IMAGE_SIZE,
            vendor_boot: cfg!(feature = "bootimg-v3"),
        }
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self::t186()
    }
}
