//! ODM data: the 32-bit board configuration word carried in the BCT.

use bootcore::{Error, Result};
pub use linuxboot::dtb_update::OdmDataParam;

/// Set when the bootloader is unlocked.
pub const TEGRA_BOOTLOADER_LOCK_BIT: u32 = 13;

/// Named ODM data fields on T186 boards.
pub const T186_PARAMS: [OdmDataParam; 6] = [
    OdmDataParam { mask: 0x0001_0000, val: 0x0001_0000, name: "enable-sata" },
    OdmDataParam { mask: 0x0006_0000, val: 0x0002_0000, name: "enable-pcie" },
    OdmDataParam { mask: 0x0008_0000, val: 0x0008_0000, name: "enable-xusb" },
    OdmDataParam { mask: 0x0030_0000, val: 0x0000_0000, name: "enable-denver-wdt" },
    OdmDataParam { mask: 0x0030_0000, val: 0x0010_0000, name: "enable-tegra-wdt" },
    OdmDataParam { mask: 0x0030_0000, val: 0x0020_0000, name: "disable-tegra-wdt" },
];

/// Backing copy of the word (the BCT in storage).
pub trait OdmDataStore {
    fn persist(&mut self, val: u32) -> Result<()>;
}

pub struct OdmData {
    value: u32,
    params: &'static [OdmDataParam],
}

impl OdmData {
    pub const fn new(value: u32, params: &'static [OdmDataParam]) -> Self {
        Self { value, params }
    }

    pub fn get(&self) -> u32 {
        self.value
    }

    /// Update the word, writing it back first.
    pub fn set(&mut self, val: u32, store: &mut dyn OdmDataStore) -> Result<()> {
        if val == self.value {
            return Ok(());
        }
        store.persist(val).inspect_err(|e| {
            log::error!("failed to update odmdata: {}", e);
        })?;
        log::info!("odmdata: {:#010x} -> {:#010x}", self.value, val);
        self.value = val;
        Ok(())
    }

    pub fn params(&self) -> Result<&'static [OdmDataParam]> {
        if self.params.is_empty() {
            return Err(Error::NotFound);
        }
        Ok(self.params)
    }

    /// Names of the fields the current word selects.
    pub fn active_params(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.params
            .iter()
            .filter(|p| self.value & p.mask == p.val)
            .map(|p| p.name)
    }

    pub fn is_device_unlocked(&self) -> bool {
        self.value & (1 << TEGRA_BOOTLOADER_LOCK_BIT) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;

    #[derive(Default)]
    struct Bct {
        writes: Vec<u32>,
        fail: bool,
    }

    impl OdmDataStore for Bct {
        fn persist(&mut self, val: u32) -> Result<()> {
            if self.fail {
                return Err(Error::Io);
            }
            self.writes.push(val);
            Ok(())
        }
    }

    #[test]
    fn lock_bit() {
        assert!(!OdmData::new(0x0009_4000 & !(1 << 13), &T186_PARAMS).is_device_unlocked());
        assert!(OdmData::new(1 << 13, &T186_PARAMS).is_device_unlocked());
    }

    #[test]
    fn set_persists_before_updating() {
        let mut bct = Bct::default();
        let mut odm = OdmData::new(0, &T186_PARAMS);
        odm.set(0x2000, &mut bct).unwrap();
        odm.set(0x2000, &mut bct).unwrap();
        assert_eq!(bct.writes, [0x2000]);
        assert_eq!(odm.get(), 0x2000);

        bct.fail = true;
        assert_eq!(odm.set(0, &mut bct), Err(Error::Io));
        assert_eq!(odm.get(), 0x2000);
    }

    #[test]
    fn params_and_active_fields() {
        let odm = OdmData::new(0x0009_0000, &T186_PARAMS);
        let active: Vec<_> = odm.active_params().collect();
        assert_eq!(active, ["enable-sata", "enable-xusb", "enable-denver-wdt"]);
        assert_eq!(odm.params().unwrap().len(), 6);
        assert_eq!(OdmData::new(0, &[]).params(), Err(Error::NotFound));
    }
}
