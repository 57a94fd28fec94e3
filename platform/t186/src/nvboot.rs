//! Boot ROM security structures as laid out in the BCT and signed headers.
//!
//! Only the layouts live here; signature checking is done by the security
//! engine.

use bootcore::{Error, Result};
use core::mem::size_of;

/// Security engine RSA key slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RsaKeySlot {
    Slot1 = 0,
    Slot2,
    Slot3,
    Slot4,
}

impl RsaKeySlot {
    pub const COUNT: usize = 4;
    /// Slot holding the OEM key used for verification.
    pub const OEM_KEY_VERIFY: Self = Self::Slot1;
    /// Slot holding the NVIDIA key used for verification.
    pub const NV_KEY_VERIFY: Self = Self::Slot2;

    /// Slot `n`, counting from 1.
    pub fn from_number(n: u32) -> Result<Self> {
        match n {
            1 => Ok(Self::Slot1),
            2 => Ok(Self::Slot2),
            3 => Ok(Self::Slot3),
            4 => Ok(Self::Slot4),
            _ => Err(Error::Invalid),
        }
    }
}

pub const RSA_MODULUS_LENGTH_BITS: usize = 2048;
pub const RSA_MODULUS_LENGTH_BYTES: usize = RSA_MODULUS_LENGTH_BITS / 8;
pub const RSA_PUBLIC_KEY_LENGTH_BYTES: usize = RSA_MODULUS_LENGTH_BYTES;
pub const RSA_EXPONENT_LENGTH_BITS: usize = 2048;
pub const RSA_EXPONENT_LENGTH_BYTES: usize = RSA_EXPONENT_LENGTH_BITS / 8;
pub const RSA_PRIVATE_KEY_EXPONENT_LENGTH_BYTES: usize = RSA_EXPONENT_LENGTH_BYTES;
pub const RSA_PUBLIC_KEY_EXPONENT_LENGTH_BYTES: usize = RSA_EXPONENT_LENGTH_BYTES;
pub const RSA_SIGNATURE_LENGTH_BITS: usize = RSA_MODULUS_LENGTH_BITS;
pub const RSA_SIGNATURE_LENGTH_BYTES: usize = RSA_SIGNATURE_LENGTH_BITS / 8;
pub const RSA_KEY_SIZE_BYTES: usize = RSA_PUBLIC_KEY_EXPONENT_LENGTH_BYTES + RSA_MODULUS_LENGTH_BYTES;
/// PSS salt is one SHA-256 digest.
pub const RSA_PSS_SALT_LENGTH_BITS: usize = 256;
pub const RSA_PSS_SALT_LENGTH_BYTES: usize = RSA_PSS_SALT_LENGTH_BITS / 8;
pub const RSA_PUBLIC_KEY_EXPONENT: u32 = 0x0001_0001;

/// AES-CMAC digest length.
pub const CMAC_HASH_LENGTH_BYTES: usize = 16;

const MODULUS_WORDS: usize = RSA_MODULUS_LENGTH_BYTES / 4;
const EXPONENT_WORDS: usize = RSA_EXPONENT_LENGTH_BYTES / 4;

fn words<const N: usize>(bytes: &[u8]) -> Result<[u32; N]> {
    if bytes.len() < N * 4 {
        return Err(Error::BufferTooSmall);
    }
    let mut out = [0u32; N];
    for (w, chunk) in out.iter_mut().zip(bytes.chunks_exact(4)) {
        *w = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct RsaKey2048 {
    pub modulus: [u32; 2048 / 8 / 4],
    pub exponent: [u32; 2048 / 8 / 4],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct RsaKeyModulus {
    pub modulus: [u32; MODULUS_WORDS],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct RsaKeyExponent {
    pub exponent: [u32; EXPONENT_WORDS],
}

/// RSASSA-PSS signature, as long as the modulus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct RsaPssSig {
    pub signature: [u32; MODULUS_WORDS],
}

/// AES-CMAC digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct CryptoHash {
    pub hash: [u32; CMAC_HASH_LENGTH_BYTES / 4],
}

/// Signature block in front of signed objects: the CMAC is used with
/// symmetric-key secure boot, the PSS signature with PKC secure boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct ObjectSignature {
    pub crypto_hash: CryptoHash,
    pub rsa_pss_sig: RsaPssSig,
}

const _: () = assert!(size_of::<RsaKey2048>() == RSA_KEY_SIZE_BYTES);
const _: () = assert!(size_of::<RsaKeyModulus>() == RSA_MODULUS_LENGTH_BYTES);
const _: () = assert!(size_of::<RsaKeyExponent>() == RSA_EXPONENT_LENGTH_BYTES);
const _: () = assert!(size_of::<RsaPssSig>() == RSA_SIGNATURE_LENGTH_BYTES);
const _: () = assert!(size_of::<CryptoHash>() == CMAC_HASH_LENGTH_BYTES);
const _: () = assert!(size_of::<ObjectSignature>() == 272);

impl RsaKey2048 {
    pub const SIZE: usize = size_of::<Self>();

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(Error::BufferTooSmall);
        }
        Ok(Self {
            modulus: words(&bytes[..RSA_MODULUS_LENGTH_BYTES])?,
            exponent: words(&bytes[RSA_MODULUS_LENGTH_BYTES..])?,
        })
    }
}

impl RsaKeyModulus {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        Ok(Self { modulus: words(bytes)? })
    }
}

impl RsaKeyExponent {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        Ok(Self { exponent: words(bytes)? })
    }
}

impl RsaPssSig {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        Ok(Self { signature: words(bytes)? })
    }
}

impl CryptoHash {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        Ok(Self { hash: words(bytes)? })
    }
}

impl ObjectSignature {
    pub const SIZE: usize = size_of::<Self>();

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(Error::BufferTooSmall);
        }
        Ok(Self {
            crypto_hash: CryptoHash::parse(bytes)?,
            rsa_pss_sig: RsaPssSig::parse(&bytes[CMAC_HASH_LENGTH_BYTES..])?,
        })
    }

    /// Whether the PKC signature is present.
    pub fn has_pss_signature(&self) -> bool {
        self.rsa_pss_sig.signature.iter().any(|w| *w != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec;

    #[test]
    fn key_slots() {
        assert_eq!(RsaKeySlot::OEM_KEY_VERIFY, RsaKeySlot::Slot1);
        assert_eq!(RsaKeySlot::NV_KEY_VERIFY as u32, 1);
        assert_eq!(RsaKeySlot::from_number(4), Ok(RsaKeySlot::Slot4));
        assert_eq!(RsaKeySlot::from_number(0), Err(Error::Invalid));
        assert_eq!(RsaKeySlot::from_number(RsaKeySlot::COUNT as u32 + 1), Err(Error::Invalid));
    }

    #[test]
    fn lengths() {
        assert_eq!(RSA_KEY_SIZE_BYTES, 512);
        assert_eq!(RSA_PSS_SALT_LENGTH_BYTES, 32);
        assert_eq!(RSA_SIGNATURE_LENGTH_BYTES, 256);
    }

    #[test]
    fn signature_block_is_little_endian() {
        let mut raw = vec![0u8; ObjectSignature::SIZE];
        raw[..4].copy_from_slice(&[0x78, 0x56, 0x34, 0x12]);
        raw[CMAC_HASH_LENGTH_BYTES + 252..].copy_from_slice(&[1, 0, 0, 0x80]);

        let sig = ObjectSignature::parse(&raw).unwrap();
        assert_eq!(sig.crypto_hash.hash[0], 0x1234_5678);
        assert_eq!(sig.rsa_pss_sig.signature[63], 0x8000_0001);
        assert!(sig.has_pss_signature());

        assert_eq!(ObjectSignature::parse(&raw[1..]), Err(Error::BufferTooSmall));
    }

    #[test]
    fn key_parse() {
        let mut raw = vec![0u8; RsaKey2048::SIZE];
        raw[RSA_MODULUS_LENGTH_BYTES..RSA_MODULUS_LENGTH_BYTES + 4]
            .copy_from_slice(&RSA_PUBLIC_KEY_EXPONENT.to_le_bytes());
        let key = RsaKey2048::parse(&raw).unwrap();
        assert_eq!(key.exponent[0], RSA_PUBLIC_KEY_EXPONENT);
        assert!(RsaKeyModulus::parse(&raw[..255]).is_err());
    }
}
