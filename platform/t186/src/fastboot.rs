//! Fastboot partition naming and partition write plumbing.
//!
//! Fastboot clients use generic names (`boot`, `system`, ...) that map onto
//! the Tegra partition layout. Partitions owned by the boot chain are never
//! exposed; anything else is passed through under its own name.

use bootcore::{BlockDevice, Error, Result};

/// A fastboot name and the Tegra partition(s) behind it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionInfo<'a> {
    pub fastboot_name: &'a str,
    pub tegra_name: &'a str,
    /// Slot B partition, on A/B layouts.
    pub tegra_name_b: Option<&'a str>,
}

const fn info(
    fastboot_name: &'static str,
    tegra_name: &'static str,
    tegra_name_b: Option<&'static str>,
) -> PartitionInfo<'static> {
    PartitionInfo {
        fastboot_name,
        tegra_name,
        tegra_name_b,
    }
}

#[cfg(all(feature = "ab-slots", feature = "sane-partitions"))]
const SLOTTED: [PartitionInfo<'static>; 8] = [
    info("recovery", "recovery_a", Some("recovery_b")),
    info("system", "system_a", Some("system_b")),
    info("boot", "boot_a", Some("boot_b")),
    info("dtb", "dtb_a", Some("dtb_b")),
    info("dtbo", "dtbo_a", Some("dtbo_b")),
    info("vendor", "vendor_a", Some("vendor_b")),
    info("vendor_boot", "vendor_boot_a", Some("vendor_boot_b")),
    info("bmp", "BMP_a", Some("BMP_b")),
];

#[cfg(all(feature = "ab-slots", not(feature = "sane-partitions")))]
const SLOTTED: [PartitionInfo<'static>; 8] = [
    info("recovery", "SOS_a", Some("SOS_b")),
    info("system", "APP_a", Some("APP_b")),
    info("boot", "kernel_a", Some("kernel_b")),
    info("dtb", "kernel-dtb_a", Some("kernel-dtb_b")),
    info("dtbo", "kernel-dtbo_a", Some("kernel-dtbo_b")),
    info("vendor", "vendor_a", Some("vendor_b")),
    info("vendor_boot", "vendor_boot_a", Some("vendor_boot_b")),
    info("bmp", "BMP_a", Some("BMP_b")),
];

#[cfg(all(not(feature = "ab-slots"), feature = "sane-partitions"))]
const SLOTTED: [PartitionInfo<'static>; 8] = [
    info("recovery", "recovery", None),
    info("system", "system", None),
    info("boot", "boot", None),
    info("dtb", "dtb", None),
    info("dtbo", "dtbo", None),
    info("vendor", "vendor", None),
    info("vendor_boot", "vendor_boot", None),
    info("bmp", "BMP", None),
];

#[cfg(all(not(feature = "ab-slots"), not(feature = "sane-partitions")))]
const SLOTTED: [PartitionInfo<'static>; 8] = [
    info("recovery", "SOS", None),
    info("system", "APP", None),
    info("boot", "kernel", None),
    info("dtb", "kernel-dtb", None),
    info("dtbo", "kernel-dtbo", None),
    info("vendor", "vendor", None),
    info("vendor_boot", "vendor_boot", None),
    info("bmp", "BMP", None),
];

#[cfg(feature = "sane-partitions")]
const UNSLOTTED: [PartitionInfo<'static>; 3] = [
    info("cache", "cache", None),
    info("userdata", "userdata", None),
    info("rpb", "RPB", None),
];

#[cfg(not(feature = "sane-partitions"))]
const UNSLOTTED: [PartitionInfo<'static>; 3] = [
    info("cache", "CAC", None),
    info("userdata", "UDA", None),
    info("rpb", "RPB", None),
];

/// Boot chain partitions fastboot must not touch.
pub const NV_PRIVATE_PARTITIONS: [&str; 12] = [
    "BCT",
    "MB1_BCT",
    "mb1",
    "mts-preboot",
    "mts-bootpack",
    "sce-fw",
    "eks",
    "sc7",
    "bpmp-fw",
    "NCT",
    "primary_gpt",
    "secondary_gpt",
];

/// Variables answered by `getvar`.
pub const VAR_LIST: [&str; 8] = [
    "version-bootloader",
    "serialno",
    "product",
    "secure",
    "unlocked",
    "current-slot",
    "slot-count",
    "slot-suffixes",
];

/// Per-partition variable prefixes.
pub const PARTITION_VAR_LIST: [&str; 2] = ["partition-size:", "has-slot:"];

/// Every mapped partition.
pub fn partition_map() -> impl Iterator<Item = &'static PartitionInfo<'static>> {
    SLOTTED.iter().chain(UNSLOTTED.iter())
}

/// `name` equals `base` or `base` with a slot suffix.
fn matches_with_suffix(base: &str, name: &str) -> bool {
    match name.strip_prefix(base) {
        Some("") | Some("_a") | Some("_b") => true,
        _ => false,
    }
}

/// Map a fastboot partition name.
///
/// Returns `None` for boot chain partitions.
pub fn get_partinfo(name: &str) -> Option<PartitionInfo<'_>> {
    if let Some(info) = partition_map().find(|p| matches_with_suffix(p.fastboot_name, name)) {
        return Some(*info);
    }
    if NV_PRIVATE_PARTITIONS
        .iter()
        .any(|p| matches_with_suffix(p, name))
    {
        log::debug!("{} is not exposed", name);
        return None;
    }
    Some(PartitionInfo {
        fastboot_name: name,
        tegra_name: name,
        tegra_name_b: Some(name),
    })
}

/// Tegra partition name for the slot selected by `suffix`.
pub fn get_tegra_part_name<'a>(suffix: &str, info: Option<&PartitionInfo<'a>>) -> Option<&'a str> {
    let info = info?;
    if suffix == "_b" {
        info.tegra_name_b
    } else {
        Some(info.tegra_name)
    }
}

/// Sequential writer over a partition.
pub trait Partition {
    fn write(&mut self, buf: &[u8]) -> Result<()>;
    /// Move the write cursor by `offset` bytes.
    fn seek(&mut self, offset: u64) -> Result<()>;
}

pub fn partition_write(part: &mut dyn Partition, buf: &[u8]) -> Result<()> {
    log::debug!("Writing {} bytes to partition", buf.len());
    part.write(buf)
}

pub fn partition_seek(part: &mut dyn Partition, offset: u64) -> Result<()> {
    log::debug!("Seeking partition by {} bytes", offset);
    part.seek(offset)
}

/// Placement of a partition on the boot device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionExtent {
    pub name: &'static str,
    pub start_lba: u64,
    pub num_lba: u64,
}

/// A partition on a block device with a byte cursor.
pub struct BlockPartition<'d, D: ?Sized> {
    dev: &'d mut D,
    extent: PartitionExtent,
    cursor: u64,
}

impl<'d, D: BlockDevice + ?Sized> BlockPartition<'d, D> {
    pub fn open(dev: &'d mut D, extent: PartitionExtent) -> Result<Self> {
        if extent.start_lba + extent.num_lba > dev.block_count() {
            log::error!("{} runs past the end of the device", extent.name);
            return Err(Error::Overflow);
        }
        Ok(Self {
            dev,
            extent,
            cursor: 0,
        })
    }

    pub fn size(&self) -> u64 {
        self.extent.num_lba * self.dev.block_size() as u64
    }

    pub fn name(&self) -> &'static str {
        self.extent.name
    }

    fn check(&self, len: usize) -> Result<u64> {
        let bs = self.dev.block_size() as u64;
        if self.cursor % bs != 0 || len as u64 % bs != 0 {
            return Err(Error::Invalid);
        }
        if self.cursor + len as u64 > self.size() {
            return Err(Error::Overflow);
        }
        Ok(self.extent.start_lba + self.cursor / bs)
    }

    /// Read whole blocks at the cursor.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<()> {
        let lba = self.check(buf.len())?;
        self.dev.read_blocks(lba, buf)?;
        self.cursor += buf.len() as u64;
        Ok(())
    }
}

impl<D: BlockDevice + ?Sized> Partition for BlockPartition<'_, D> {
    fn write(&mut self, buf: &[u8]) -> Result<()> {
        let lba = self.check(buf.len())?;
        self.dev.write_blocks(lba, buf)?;
        self.cursor += buf.len() as u64;
        Ok(())
    }

    fn seek(&mut self, offset: u64) -> Result<()> {
        let pos = self.cursor.checked_add(offset).ok_or(Error::Overflow)?;
        if pos > self.size() {
            return Err(Error::Overflow);
        }
        self.cursor = pos;
        Ok(())
    }
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
        fn write_blocks(&mut self, lba: u64, buf: &[u8]) -> Result<()> {
            let off = lba as usize * 512;
            self.0[off..off + buf.len()].copy_from_slice(buf);
            Ok(())
        }
    }

    #[test]
    fn suffix_matching() {
        assert!(matches_with_suffix("boot", "boot"));
        assert!(matches_with_suffix("boot", "boot_b"));
        assert!(!matches_with_suffix("boot", "boot_c"));
        assert!(!matches_with_suffix("boot", "bootloader"));
    }

    #[test]
    fn mapped_partitions() {
        let boot = get_partinfo("boot").unwrap();
        assert_eq!(boot.fastboot_name, "boot");
        assert_eq!(get_partinfo("boot_a"), Some(boot));

        #[cfg(not(any(feature = "ab-slots", feature = "sane-partitions")))]
        {
            assert_eq!(get_tegra_part_name("", Some(&boot)), Some("kernel"));
            assert_eq!(get_tegra_part_name("_b", Some(&boot)), None);
            let uda = get_partinfo("userdata").unwrap();
            assert_eq!(uda.tegra_name, "UDA");
        }
        #[cfg(all(feature = "ab-slots", not(feature = "sane-partitions")))]
        assert_eq!(get_tegra_part_name("_b", Some(&boot)), Some("kernel_b"));

        assert_eq!(get_tegra_part_name("_a", None), None);
        assert_eq!(partition_map().count(), 11);
    }

    #[test]
    fn private_partitions_are_hidden() {
        assert_eq!(get_partinfo("mb1"), None);
        assert_eq!(get_partinfo("bpmp-fw_b"), None);
        assert_eq!(get_partinfo("primary_gpt"), None);
    }

    #[test]
    fn unknown_names_pass_through() {
        let p = get_partinfo("factory").unwrap();
        assert_eq!(p.tegra_name, "factory");
        assert_eq!(get_tegra_part_name("_b", Some(&p)), Some("factory"));
    }

    #[test]
    fn block_partition_write_and_seek() {
        let mut disk = RamDisk(vec![0; 512 * 16]);
        let extent = PartitionExtent {
            name: "kernel",
            start_lba: 4,
            num_lba: 4,
        };
        {
            let mut part = BlockPartition::open(&mut disk, extent).unwrap();
            assert_eq!(part.size(), 2048);
            partition_seek(&mut part, 512).unwrap();
            partition_write(&mut part, &[0xaa; 512]).unwrap();
            assert_eq!(partition_write(&mut part, &[0; 100]), Err(Error::Invalid));
            assert_eq!(partition_write(&mut part, &[0; 1536]), Err(Error::Overflow));
            assert_eq!(partition_seek(&mut part, 4096), Err(Error::Overflow));
        }
        assert_eq!(disk.0[5 * 512], 0xaa);
        assert_eq!(disk.0[4 * 512], 0);

        let mut part = BlockPartition::open(&mut disk, extent).unwrap();
        let mut buf = [0u8; 1024];
        part.read(&mut buf).unwrap();
        assert_eq!(buf[512], 0xaa);

        let too_big = PartitionExtent { num_lba: 13, ..extent };
        assert!(BlockPartition::open(&mut disk, too_big).is_err());
    }
}
