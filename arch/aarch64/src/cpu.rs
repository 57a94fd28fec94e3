//! CPU register access and identification.

use crate::on_target;

/// Read the Main ID Register.
#[inline]
pub fn read_midr_el1() -> u64 {
    #[allow(unused_mut)]
    let mut val: u64 = 0;
    on_target!("mrs {}, midr_el1", out(reg) val, options(nomem, nostack));
    val
}

/// Core types found in the T186 CPU complex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreKind {
    CortexA57,
    Denver2,
    Other,
}

/// Decoded MIDR fields.
#[derive(Debug, Clone, Copy)]
pub struct Midr {
    pub implementer: u8,
    pub variant: u8,
    pub architecture: u8,
    pub part_num: u16,
    pub revision: u8,
}

impl Midr {
    pub fn read() -> Self {
        Self::decode(read_midr_el1())
    }

    pub const fn decode(val: u64) -> Self {
        Self {
            implementer: ((val >> 24) & 0xFF) as u8,
            variant: ((val >> 20) & 0xF) as u8,
            architecture: ((val >> 16) & 0xF) as u8,
            part_num: ((val >> 4) & 0xFFF) as u16,
            revision: (val & 0xF) as u8,
        }
    }

    pub fn kind(&self) -> CoreKind {
        match (self.implementer, self.part_num) {
            (0x41, 0xD07) => CoreKind::CortexA57,
            (0x4E, 0x003) => CoreKind::Denver2,
            _ => CoreKind::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifies_t186_cores() {
        assert_eq!(Midr::decode(0x411F_D073).kind(), CoreKind::CortexA57);
        assert_eq!(Midr::decode(0x4E0F_0030).kind(), CoreKind::Denver2);
        assert_eq!(Midr::decode(0x410F_D034).kind(), CoreKind::Other);
        assert_eq!(Midr::decode(0x411F_D073).revision, 3);
    }
}
