//! Android boot image headers.
//!
//! `boot.img` starts with a page-sized header followed by the kernel and
//! ramdisk, each padded to a page boundary. Header versions 0 to 2 share
//! one layout; version 3 moves the page size, load addresses and the
//! vendor command line into a separate `vendor_boot.img`.

use bootcore::{Error, Result};
use core::mem::size_of;

pub const BOOT_MAGIC: &[u8; BOOT_MAGIC_SIZE] = b"ANDROID!";
pub const BOOT_MAGIC_SIZE: usize = 8;
pub const BOOT_NAME_SIZE: usize = 16;
pub const BOOT_ARGS_SIZE: usize = 512;
pub const BOOT_EXTRA_ARGS_SIZE: usize = 1024;

pub const VENDOR_BOOT_MAGIC: &[u8; VENDOR_BOOT_MAGIC_SIZE] = b"VNDRBOOT";
pub const VENDOR_BOOT_MAGIC_SIZE: usize = 8;
pub const VENDOR_BOOT_ARGS_SIZE: usize = 2048;
pub const VENDOR_BOOT_NAME_SIZE: usize = 16;

/// Bytes reserved for the boot.img header.
pub const ANDROID_HEADER_SIZE: usize = 2048;
/// Size of the vendor_boot.img v3 header.
pub const VENDOR_BOOT_HEADER_SIZE: usize = 2112;
/// boot.img v3 always uses 4 KiB pages.
pub const BOOT_IMAGE_V3_PAGE_SIZE: u32 = 4096;

/// boot.img header, versions 0 to 2.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct BootImgHeader {
    pub magic: [u8; BOOT_MAGIC_SIZE],
    pub kernel_size: u32,
    pub kernel_addr: u32,

    pub ramdisk_size: u32,
    pub ramdisk_addr: u32,

    pub second_size: u32,
    pub second_addr: u32,

    pub tags_addr: u32,
    pub page_size: u32,

    pub header_version: u32,
    pub os_version: u32,

    pub name: [u8; BOOT_NAME_SIZE],
    pub cmdline: [u8; BOOT_ARGS_SIZE],

    pub id: [u32; 8],

    pub extra_cmdline: [u8; BOOT_EXTRA_ARGS_SIZE],
}

/// boot.img header, version 3.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct BootImgHeaderV3 {
    pub magic: [u8; BOOT_MAGIC_SIZE],
    pub kernel_size: u32,
    pub ramdisk_size: u32,
    pub os_version: u32,
    pub header_size: u32,
    pub reserved: [u32; 4],
    pub header_version: u32,
    pub cmdline: [u8; BOOT_ARGS_SIZE + BOOT_EXTRA_ARGS_SIZE],
}

/// vendor_boot.img header, version 3.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct VendorBootImgHeader {
    pub magic: [u8; VENDOR_BOOT_MAGIC_SIZE],
    pub header_version: u32,
    pub page_size: u32,
    pub kernel_addr: u32,
    pub ramdisk_addr: u32,
    pub vendor_ramdisk_size: u32,
    pub cmdline: [u8; VENDOR_BOOT_ARGS_SIZE],
    pub tags_addr: u32,
    pub name: [u8; VENDOR_BOOT_NAME_SIZE],
    pub header_size: u32,
    pub dtb_size: u32,
    pub dtb_addr: u64,
}

const _: () = assert!(size_of::<BootImgHeader>() <= ANDROID_HEADER_SIZE);
const _: () = assert!(size_of::<BootImgHeaderV3>() <= ANDROID_HEADER_SIZE);
const _: () = assert!(size_of::<VendorBootImgHeader>() == VENDOR_BOOT_HEADER_SIZE);

/// Offset of `header_version`; identical in every boot.img layout.
const HEADER_VERSION_OFFSET: usize = 40;

fn read_header<T: Copy>(buf: &[u8]) -> Result<T> {
    if buf.len() < size_of::<T>() {
        return Err(Error::BufferTooSmall);
    }
    // SAFETY: length checked above; every field is plain data valid for any
    // bit pattern, and the read tolerates any alignment.
    Ok(unsafe { core::ptr::read_unaligned(buf.as_ptr().cast::<T>()) })
}

/// Bytes of a fixed-size C string field up to the first NUL.
pub fn c_str(field: &[u8]) -> &[u8] {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    &field[..end]
}

/// Check the boot.img magic.
pub fn validate_boot_image(buf: &[u8]) -> Result<()> {
    log::info!("Checking boot.img header magic...");
    if buf.len() < BOOT_MAGIC_SIZE {
        return Err(Error::BufferTooSmall);
    }
    if &buf[..BOOT_MAGIC_SIZE] != BOOT_MAGIC {
        log::error!("Invalid boot.img @ {:p} (header magic mismatch)", buf.as_ptr());
        return Err(Error::VerifyFailed);
    }
    log::info!("Valid boot.img @ {:p}", buf.as_ptr());
    Ok(())
}

/// Check the vendor_boot.img magic.
pub fn validate_vendor_boot_image(buf: &[u8]) -> Result<()> {
    log::info!("Checking vendor_boot.img header magic...");
    if buf.len() < VENDOR_BOOT_MAGIC_SIZE {
        return Err(Error::BufferTooSmall);
    }
    if &buf[..VENDOR_BOOT_MAGIC_SIZE] != VENDOR_BOOT_MAGIC {
        log::error!("Invalid vendor_boot.img @ {:p} (header magic mismatch)", buf.as_ptr());
        return Err(Error::VerifyFailed);
    }
    log::info!("Valid vendor_boot.img @ {:p}", buf.as_ptr());
    Ok(())
}

/// A parsed boot.img header of any supported version.
#[derive(Debug, Clone, Copy)]
pub enum BootHeader {
    Legacy(BootImgHeader),
    V3(BootImgHeaderV3),
}

impl BootHeader {
    /// Validate the magic and decode the header matching `header_version`.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        validate_boot_image(buf)?;
        let version_bytes = buf
            .get(HEADER_VERSION_OFFSET..HEADER_VERSION_OFFSET + 4)
            .ok_or(Error::BufferTooSmall)?;
        let version = u32::from_le_bytes([
            version_bytes[0],
            version_bytes[1],
            version_bytes[2],
            version_bytes[3],
        ]);
        if version >= 3 {
            Ok(Self::V3(read_header(buf)?))
        } else {
            Ok(Self::Legacy(read_header(buf)?))
        }
    }

    pub fn header_version(&self) -> u32 {
        match self {
            Self::Legacy(h) => h.header_version,
            Self::V3(h) => h.header_version,
        }
    }

    pub fn kernel_size(&self) -> u32 {
        match self {
            Self::Legacy(h) => h.kernel_size,
            Self::V3(h) => h.kernel_size,
        }
    }

    pub fn ramdisk_size(&self) -> u32 {
        match self {
            Self::Legacy(h) => h.ramdisk_size,
            Self::V3(h) => h.ramdisk_size,
        }
    }

    /// Page size the image was packed with.
    pub fn page_size(&self) -> u32 {
        match self {
            Self::Legacy(h) => h.page_size,
            Self::V3(_) => BOOT_IMAGE_V3_PAGE_SIZE,
        }
    }

    /// Kernel command line, without the trailing NUL padding.
    pub fn cmdline(&self) -> &[u8] {
        match self {
            Self::Legacy(h) => c_str(&h.cmdline),
            Self::V3(h) => c_str(&h.cmdline),
        }
    }
}

impl VendorBootImgHeader {
    pub fn parse(buf: &[u8]) -> Result<Self> {
        validate_vendor_boot_image(buf)?;
        read_header(buf)
    }

    pub fn cmdline(&self) -> &[u8] {
        c_str(&self.cmdline)
    }
}

/// Compression formats recognised by their magic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Gzip,
    Lz4,
}

/// Detect a compressed kernel from its leading bytes.
pub fn is_compressed_content(buf: &[u8]) -> Option<Compression> {
    match buf {
        [0x1f, 0x8b, ..] => Some(Compression::Gzip),
        [0x04, 0x22, 0x4d, 0x18, ..] => Some(Compression::Lz4),
        _ => None,
    }
}


#[cfg(test)]
mod tests {
    use super::test_images::*;
    use super::*;

    #[test]
    fn header_layouts() {
        assert_eq!(size_of::<BootImgHeader>(), 1632);
        assert_eq!(size_of::<BootImgHeaderV3>(), 1580);
    }

    #[test]
    fn parses_legacy_header() {
        let img = boot_v0(2048, &[1; 3000], &[2; 100], "console=ttyS0 quiet");
        let hdr = BootHeader::parse(&img).unwrap();
        assert_eq!(hdr.header_version(), 0);
        assert_eq!(hdr.kernel_size(), 3000);
        assert_eq!(hdr.ramdisk_size(), 100);
        assert_eq!(hdr.page_size(), 2048);
        assert_eq!(hdr.cmdline(), b"console=ttyS0 quiet");
    }

    #[test]
    fn parses_v3_and_vendor_headers() {
        let img = boot_v3(&[1; 10], &[2; 20], "root=/dev/sda1");
        let hdr = BootHeader::parse(&img).unwrap();
        assert!(matches!(hdr, BootHeader::V3(_)));
        assert_eq!(hdr.kernel_size(), 10);
        assert_eq!(hdr.ramdisk_size(), 20);
        assert_eq!(hdr.page_size(), 4096);
        assert_eq!(hdr.cmdline(), b"root=/dev/sda1");

        let vnd = VendorBootImgHeader::parse(&vendor_boot(4096, &[3; 5], "rw")).unwrap();
        let page_size = vnd.page_size;
        let vendor_ramdisk_size = vnd.vendor_ramdisk_size;
        assert_eq!(page_size, 4096);
        assert_eq!(vendor_ramdisk_size, 5);
        assert_eq!(vnd.cmdline(), b"rw");
    }

    #[test]
    fn rejects_bad_magic_and_short_buffers() {
        let mut img = boot_v0(2048, &[1; 4], &[], "");
        img[0] = b'X';
        assert_eq!(BootHeader::parse(&img).unwrap_err(), Error::VerifyFailed);
        assert_eq!(BootHeader::parse(b"ANDR").unwrap_err(), Error::BufferTooSmall);
        assert_eq!(
            BootHeader::parse(&img_prefix()).unwrap_err(),
            Error::BufferTooSmall
        );
        assert_eq!(
            VendorBootImgHeader::parse(&[0u8; 4096]).unwrap_err(),
            Error::VerifyFailed
        );
    }

    fn img_prefix() -> Vec<u8> {
        let img = boot_v0(2048, &[1; 4], &[], "");
        img[..100].to_vec()
    }

    #[test]
    fn detects_compression() {
        assert_eq!(is_compressed_content(&[0x1f, 0x8b, 8, 0]), Some(Compression::Gzip));
        assert_eq!(is_compressed_content(&[0x04, 0x22, 0x4d, 0x18]), Some(Compression::Lz4));
        assert_eq!(is_compressed_content(b"MZ\0\0"), None);
        assert_eq!(is_compressed_content(&[]), None);
    }
}
