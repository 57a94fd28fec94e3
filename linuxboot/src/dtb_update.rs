//! Publish bootloader state to the kernel through its device tree.
//!
//! Each filler owns one piece of information (memory layout, initrd,
//! command line, ODM data, ...) and writes it under a top-level node. The
//! board supplies the facts through [`LinuxBootHelper`].

use crate::cmdline::{MAX_COMMAND_LINE_SIZE, param_value_override};
use crate::dtb::{DeviceTree, NodeId};
use alloc::string::String;
use alloc::vec::Vec;
use arch_aarch64::smc::{SecureMonitor, SmcParams};
use bootcore::{Error, Result, round_down, round_up};

/// A physical memory range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemBlock {
    pub base: u64,
    pub size: u64,
}

/// Console the kernel should use for early output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugConsole {
    None,
    Dcc,
    Uart,
}

/// Trusted OS running in the secure world.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecureOs {
    None,
    Tlk,
    Trusty,
}

impl SecureOs {
    fn node_path(self) -> Option<&'static str> {
        match self {
            SecureOs::None => None,
            SecureOs::Tlk => Some("/tlk"),
            SecureOs::Trusty => Some("/trusty"),
        }
    }
}

/// Network interfaces whose MAC address is stored in the module EEPROM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacAddrType {
    Wifi,
    Bluetooth,
    Ethernet,
}

impl MacAddrType {
    pub const ALL: [MacAddrType; 3] = [MacAddrType::Wifi, MacAddrType::Bluetooth, MacAddrType::Ethernet];

    pub fn interface(self) -> &'static str {
        match self {
            MacAddrType::Wifi => "WIFI",
            MacAddrType::Bluetooth => "Bluetooth",
            MacAddrType::Ethernet => "Ethernet",
        }
    }

    pub fn chosen_prop(self) -> &'static str {
        match self {
            MacAddrType::Wifi => "nvidia,wifi-mac",
            MacAddrType::Bluetooth => "nvidia,bluetooth-mac",
            MacAddrType::Ethernet => "nvidia,ether-mac",
        }
    }
}

/// A named ODM data field; set when `odmdata & mask == val`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OdmDataParam {
    pub mask: u32,
    pub val: u32,
    pub name: &'static str,
}

/// Board-specific node filler.
pub type FillDtNode = fn(&mut DeviceTree, NodeId) -> Result<()>;

/// A filler and the top-level node it writes under.
#[derive(Debug, Clone, Copy)]
pub struct DtNodeInfo {
    pub node_name: &'static str,
    pub fill: FillDtNode,
}

/// Board facts consumed while patching the kernel DTB.
pub trait LinuxBootHelper {
    /// `idx`-th usable DRAM range; a zero-sized block ends the list.
    fn memory_block(&self, idx: usize) -> Result<MemBlock>;

    /// Location of the ramdisk, if one was loaded.
    fn initrd(&self) -> Option<MemBlock>;

    /// BPMP firmware carveout.
    fn bpmp_carveout(&self) -> Result<MemBlock>;

    fn debug_console(&self) -> Result<DebugConsole>;

    fn secure_os(&self) -> Result<SecureOs>;

    fn serial_number(&self) -> Result<String>;

    /// Current ODM data word.
    fn odmdata(&self) -> u32;

    /// Named fields exported under `/chosen/plugin-manager/odm-data`.
    fn odmdata_params(&self) -> Result<&[OdmDataParam]>;

    /// Formatted `xx:xx:xx:xx:xx:xx` address of an interface.
    fn mac_address(&self, _kind: MacAddrType) -> Result<String> {
        Err(Error::NotSupported)
    }

    /// Part ids (`"3310-1000-B00"` style) read from the module and carrier
    /// board EEPROMs.
    fn board_ids(&self) -> Result<Vec<String>> {
        Err(Error::NotSupported)
    }

    /// NCT `(id, config)` spec strings.
    fn nct_spec(&self) -> Result<(String, String)> {
        Err(Error::NotSupported)
    }

    /// Extra board nodes, filled after the common ones.
    fn extra_nodes(&self) -> &[DtNodeInfo] {
        &[]
    }

    /// Final kernel command line from the DTB's and the boot image's.
    fn prepare_cmdline(&self, dtb_cmdline: &str, bootimg_cmdline: &str) -> String {
        let mut out = String::from(dtb_cmdline.trim());
        let extra = bootimg_cmdline.trim();
        if !extra.is_empty() {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(extra);
        }
        out
    }
}

/// Most DRAM ranges reported to the kernel.
pub const MAX_MEM_CHUNKS: usize = 20;

const ODMDATA_EVAL_4G_MEM: u32 = 1 << 6;
const SDRAM_START_ADDRESS: u64 = 0x8000_0000;
const SDRAM_OFFSET_4G: u64 = SDRAM_START_ADDRESS + 0x1_0000_0000;
const MEM_ALIGN: u64 = 0x20_0000;

/// Trusty fastcall registering the non-secure DRAM ranges.
pub const SMC_FC_REGISTER_NS_DRAM_RANGES: u32 = 0xBC00_000C;
const TOS_NS_MEM_MAP_MAGIC_VALUE: u32 = 0xfeed_beef;
const TOS_NS_MEM_MAP_CUR_VERSION: u32 = 0x1;
/// Packed map header: magic, version, count and two reserved bytes.
const TOS_NS_MEM_MAP_HEADER_SIZE: usize = 4 + 4 + 4 + 2;
pub const TOS_NS_MEM_MAP_SIZE_MAX: usize = TOS_NS_MEM_MAP_HEADER_SIZE + MAX_MEM_CHUNKS * 16;

/// Everything a filler may need besides the tree.
struct Ctx<'a, H: ?Sized, M: ?Sized> {
    helper: &'a H,
    monitor: &'a mut M,
    bootimg_cmdline: &'a str,
}

/// Insert bootloader information into the kernel device tree.
///
/// Node and property failures abort the update; the trusted OS node and
/// the serial number are best effort.
pub fn update_dtb<H, M>(
    tree: &mut DeviceTree,
    helper: &H,
    monitor: &mut M,
    bootimg_cmdline: &str,
) -> Result<()>
where
    H: LinuxBootHelper + ?Sized,
    M: SecureMonitor + ?Sized,
{
    let mut ctx = Ctx { helper, monitor, bootimg_cmdline };

    // Sorted by node name.
    #[allow(clippy::type_complexity)]
    let mut common: Vec<(&str, fn(&mut Ctx<'_, H, M>, &mut DeviceTree, NodeId) -> Result<()>)> =
        Vec::new();
    common.push(("bpmp", add_bpmp_info));
    common.push(("chosen", add_initrd_info));
    common.push(("chosen", add_bootarg_info));
    common.push(("chosen", add_odmdata_info));
    if cfg!(feature = "nct") {
        common.push(("chosen", add_tnspec_info));
    }
    if cfg!(feature = "eeprom") {
        common.push(("chosen", add_mac_addr_info));
        common.push(("chosen", add_plugin_manager_ids));
    }
    common.push(("memory", add_memory_info));

    for (name, fill) in common {
        let Ok(node) = tree.add_subnode_if_absent(DeviceTree::ROOT, name) else {
            continue;
        };
        log::debug!("node_name={}", name);
        fill(&mut ctx, tree, node).inspect_err(|e| {
            log::error!("updating /{} failed: {}", name, e);
        })?;
    }

    for extra in helper.extra_nodes() {
        let Ok(node) = tree.add_subnode_if_absent(DeviceTree::ROOT, extra.node_name) else {
            continue;
        };
        log::debug!("node_name={}", extra.node_name);
        (extra.fill)(tree, node).inspect_err(|e| {
            log::error!("updating /{} failed: {}", extra.node_name, e);
        })?;
    }

    if let Err(e) = update_tos_nodes(tree, helper) {
        log::error!("failed to enable secure OS node: {}", e);
    }
    if let Err(e) = add_serialno(tree, helper) {
        log::error!("failed to add serial number: {}", e);
    }

    log::debug!("update_dtb: done");
    Ok(())
}

fn add_bpmp_info<H, M>(ctx: &mut Ctx<'_, H, M>, tree: &mut DeviceTree, node: NodeId) -> Result<()>
where
    H: LinuxBootHelper + ?Sized,
    M: ?Sized,
{
    let block = ctx.helper.bpmp_carveout().inspect_err(|_| {
        log::error!("Failed to get bpmp mem layout");
    })?;

    if block.size == 0 || block.base == 0 {
        log::info!("Skipping BPMP FW node addition");
        return Ok(());
    }

    tree.set_property_u32(node, "carveout-start", block.base as u32)?;
    tree.set_property_u32(node, "carveout-size", block.size as u32)?;
    log::info!("Updated bpmp info to DTB");
    Ok(())
}

fn add_initrd_info<H, M>(ctx: &mut Ctx<'_, H, M>, tree: &mut DeviceTree, node: NodeId) -> Result<()>
where
    H: LinuxBootHelper + ?Sized,
    M: ?Sized,
{
    let Some(block) = ctx.helper.initrd() else {
        return Ok(());
    };

    tree.set_property_u32(node, "linux,initrd-start", block.base as u32)?;
    tree.set_property_u32(node, "linux,initrd-end", (block.base + block.size) as u32)?;
    log::info!("Ramdisk: Base: {:#x}; Size: {:#x}", block.base, block.size);
    log::info!("Updated initrd info to DTB");
    Ok(())
}

fn add_bootarg_info<H, M>(ctx: &mut Ctx<'_, H, M>, tree: &mut DeviceTree, node: NodeId) -> Result<()>
where
    H: LinuxBootHelper + ?Sized,
    M: ?Sized,
{
    let mut dtb_cmdline = String::from(tree.property_str(node, "bootargs").unwrap_or(""));

    match ctx.helper.debug_console() {
        Ok(DebugConsole::None) => {
            // A DTB without console= keeps its line unchanged.
            let _ = param_value_override(&mut dtb_cmdline, "console=", "none");
        }
        Ok(_) => {}
        Err(_) => log::warn!("Fail to override \"console=none\" in commandline"),
    }

    let mut cmdline = ctx.helper.prepare_cmdline(&dtb_cmdline, ctx.bootimg_cmdline);
    cmdline.push(' ');
    if cmdline.len() + 1 > MAX_COMMAND_LINE_SIZE {
        log::warn!("command line truncated to {} bytes", MAX_COMMAND_LINE_SIZE - 1);
        let mut cut = MAX_COMMAND_LINE_SIZE - 1;
        while !cmdline.is_char_boundary(cut) {
            cut -= 1;
        }
        cmdline.truncate(cut);
    }

    tree.set_property_string(node, "bootargs", &cmdline)
        .inspect_err(|e| log::error!("Failed to set bootargs in DTB ({})", e))?;
    log::info!("Updated bootarg info to DTB");
    Ok(())
}

fn add_odmdata_info<H, M>(ctx: &mut Ctx<'_, H, M>, tree: &mut DeviceTree, node: NodeId) -> Result<()>
where
    H: LinuxBootHelper + ?Sized,
    M: ?Sized,
{
    let odmdata = ctx.helper.odmdata();
    let params = ctx.helper.odmdata_params()?;

    let pm = tree.add_subnode_if_absent(node, "plugin-manager")?;
    let odm = tree.add_subnode_if_absent(pm, "odm-data")?;

    for param in params.iter().filter(|p| odmdata & p.mask == p.val) {
        tree.set_property_u32(odm, param.name, 1).inspect_err(|e| {
            log::error!("Unable to set /chosen/plugin-manager/{} ({})", param.name, e);
        })?;
    }

    log::debug!("Updated odmdata info to DTB");
    Ok(())
}

fn add_tnspec_info<H, M>(ctx: &mut Ctx<'_, H, M>, tree: &mut DeviceTree, node: NodeId) -> Result<()>
where
    H: LinuxBootHelper + ?Sized,
    M: ?Sized,
{
    let Ok((id, config)) = ctx.helper.nct_spec() else {
        log::warn!("Getting spec not successful, skip...");
        return Ok(());
    };

    let pm = tree.add_subnode_if_absent(node, "plugin-manager")?;
    let tnspec = tree.add_subnode_if_absent(pm, "tnspec")?;

    log::debug!("Adding tnspec/id: {}", id);
    tree.set_property_string(tnspec, "id", &id)?;
    log::debug!("Adding tnspec/config: {}", config);
    tree.set_property_string(tnspec, "config", &config)?;
    Ok(())
}

fn add_mac_addr_info<H, M>(ctx: &mut Ctx<'_, H, M>, tree: &mut DeviceTree, node: NodeId) -> Result<()>
where
    H: LinuxBootHelper + ?Sized,
    M: ?Sized,
{
    for kind in MacAddrType::ALL {
        let addr = match ctx.helper.mac_address(kind) {
            Ok(addr) => addr,
            Err(_) => {
                log::warn!("Failed to get {} MAC address", kind.interface());
                continue;
            }
        };
        if tree.set_property_string(node, kind.chosen_prop(), &addr).is_err() {
            log::warn!("Failed to update DT for {} MAC address", kind.interface());
            continue;
        }
        log::debug!("{} MAC Address = {}", kind.interface(), addr);
    }
    Ok(())
}

/// Publish the EEPROM board ids under `plugin-manager/ids` so overlays can
/// match on them.
fn add_plugin_manager_ids<H, M>(ctx: &mut Ctx<'_, H, M>, tree: &mut DeviceTree, node: NodeId) -> Result<()>
where
    H: LinuxBootHelper + ?Sized,
    M: ?Sized,
{
    let ids = match ctx.helper.board_ids() {
        Ok(ids) if !ids.is_empty() => ids,
        _ => {
            log::warn!("No board ids from EEPROM, skip plugin-manager ids");
            return Ok(());
        }
    };

    let pm = tree.add_subnode_if_absent(node, "plugin-manager")?;
    let ids_node = tree.add_subnode_if_absent(pm, "ids")?;
    for id in &ids {
        log::debug!("Adding plugin-manager id {}", id);
        tree.set_property_string(ids_node, id, "")?;
    }
    Ok(())
}

/// Usable DRAM ranges after the 4 GiB clip and 2 MiB alignment.
pub fn usable_memory<H: LinuxBootHelper + ?Sized>(helper: &H) -> Vec<MemBlock> {
    let odmdata = helper.odmdata();
    let mut chunks = Vec::new();

    for idx in 0..MAX_MEM_CHUNKS {
        let mut block = match helper.memory_block(idx) {
            Ok(b) if b.size != 0 => b,
            _ => break,
        };

        // ODM data bit 6 limits the kernel to the lower 4 GiB of DRAM.
        if odmdata & ODMDATA_EVAL_4G_MEM != 0 && block.base + block.size > SDRAM_OFFSET_4G {
            if block.base >= SDRAM_OFFSET_4G {
                break;
            }
            block.size = SDRAM_OFFSET_4G - block.base;
        }

        let base = round_up(block.base, MEM_ALIGN);
        if base >= block.base + block.size {
            continue;
        }
        // The kernel rejects ranges that are not whole 2 MiB multiples.
        let size = round_down(block.size - (base - block.base), MEM_ALIGN);

        if size > 0 {
            chunks.push(MemBlock { base, size });
        }
    }
    chunks
}

/// Serialize the trusted OS view of the non-secure DRAM ranges.
fn ns_mem_map(chunks: &[MemBlock]) -> Vec<u8> {
    let mut map = alloc::vec![0u8; TOS_NS_MEM_MAP_SIZE_MAX];
    map[0..4].copy_from_slice(&TOS_NS_MEM_MAP_MAGIC_VALUE.to_le_bytes());
    map[4..8].copy_from_slice(&TOS_NS_MEM_MAP_CUR_VERSION.to_le_bytes());
    map[8..12].copy_from_slice(&(chunks.len() as u32).to_le_bytes());
    for (i, c) in chunks.iter().enumerate() {
        let off = TOS_NS_MEM_MAP_HEADER_SIZE + i * 16;
        map[off..off + 8].copy_from_slice(&c.base.to_le_bytes());
        map[off + 8..off + 16].copy_from_slice(&c.size.to_le_bytes());
    }
    map
}

fn register_ns_dram<M: SecureMonitor + ?Sized>(monitor: &mut M, chunks: &[MemBlock]) {
    let mut map = ns_mem_map(chunks);
    let addr = map.as_ptr() as u64;
    arch_aarch64::cache::clean_dcache_range(map.as_ptr() as usize, map.len());

    // Trusty only takes 32-bit arguments.
    let mut regs = SmcParams::new(SMC_FC_REGISTER_NS_DRAM_RANGES);
    regs.reg[1] = addr & 0xFFFF_FFFF;
    regs.reg[2] = addr >> 32;
    regs.reg[3] = TOS_NS_MEM_MAP_SIZE_MAX as u64;
    monitor.call(&mut regs);

    if regs.reg[0] != 0 {
        log::error!("Failed to pass NS DRAM ranges to TOS");
    } else {
        log::info!("NS DRAM ranges recorded by TOS");
    }
    map.fill(0);
}

fn add_memory_info<H, M>(ctx: &mut Ctx<'_, H, M>, tree: &mut DeviceTree, node: NodeId) -> Result<()>
where
    H: LinuxBootHelper + ?Sized,
    M: SecureMonitor + ?Sized,
{
    let chunks = usable_memory(ctx.helper);
    for c in &chunks {
        log::info!("added [base:{:#x}, size:{:#x}] to /memory", c.base, c.size);
    }

    register_ns_dram(&mut *ctx.monitor, &chunks);

    // Assumes #address-cells = #size-cells = 2.
    tree.set_property_string(node, "device_type", "memory")
        .inspect_err(|e| log::error!("Failed to update /memory/device_type in DTB ({})", e))?;
    if !chunks.is_empty() {
        let cells: Vec<u64> = chunks.iter().flat_map(|c| [c.base, c.size]).collect();
        tree.set_property_u64s(node, "reg", &cells)
            .inspect_err(|e| log::error!("Failed to update /memory/reg in DTB ({})", e))?;
    }

    log::info!("Updated memory info to DTB");
    Ok(())
}

fn update_tos_nodes<H: LinuxBootHelper + ?Sized>(tree: &mut DeviceTree, helper: &H) -> Result<()> {
    let tos = helper.secure_os()?;
    let Some(path) = tos.node_path() else {
        return Ok(());
    };
    let node = tree.find_node(path).ok_or(Error::DtNodeNotFound)?;

    log::info!("Enable TOS: {}", &path[1..]);
    tree.set_property_string(node, "status", "okay")
}

fn add_serialno<H: LinuxBootHelper + ?Sized>(tree: &mut DeviceTree, helper: &H) -> Result<()> {
    let sno = helper
        .serial_number()
        .inspect_err(|_| log::error!("Failed to get serial number"))?;

    log::info!("Add serial number as DT property");
    tree.set_property_string(DeviceTree::ROOT, "serial-number", &sno)
}

#[cfg(test)]
pub(crate) mod test_helper {
    use super::*;
    use alloc::string::ToString;
    use alloc::vec;

    pub struct Board {
        pub memory: Vec<MemBlock>,
        pub initrd: Option<MemBlock>,
        pub bpmp: MemBlock,
        pub console: DebugConsole,
        pub tos: SecureOs,
        pub odmdata: u32,
        pub params: Vec<OdmDataParam>,
        pub serial: Option<String>,
        pub board_ids: Vec<String>,
    }

    impl Default for Board {
        fn default() -> Self {
            Self {
                memory: vec![MemBlock { base: 0x8000_0000, size: 0x7000_0000 }],
                initrd: None,
                bpmp: MemBlock { base: 0xF000_0000, size: 0x20_0000 },
                console: DebugConsole::Uart,
                tos: SecureOs::None,
                odmdata: 0,
                params: Vec::new(),
                serial: Some("0421617029447".to_string()),
                board_ids: Vec::new(),
            }
        }
    }

    impl LinuxBootHelper for Board {
        fn memory_block(&self, idx: usize) -> Result<MemBlock> {
            Ok(self.memory.get(idx).copied().unwrap_or_default())
        }
        fn initrd(&self) -> Option<MemBlock> {
            self.initrd
        }
        fn bpmp_carveout(&self) -> Result<MemBlock> {
            Ok(self.bpmp)
        }
        fn debug_console(&self) -> Result<DebugConsole> {
            Ok(self.console)
        }
        fn secure_os(&self) -> Result<SecureOs> {
            Ok(self.tos)
        }
        fn serial_number(&self) -> Result<String> {
            self.serial.clone().ok_or(Error::NotFound)
        }
        fn board_ids(&self) -> Result<Vec<String>> {
            Ok(self.board_ids.clone())
        }
        fn odmdata(&self) -> u32 {
            self.odmdata
        }
        fn odmdata_params(&self) -> Result<&[OdmDataParam]> {
            Ok(&self.params)
        }
    }

    /// Records every SMC and the NS memory map it pointed at.
    #[derive(Default)]
    pub struct RecordingMonitor {
        pub calls: Vec<SmcParams>,
        pub maps: Vec<Vec<u8>>,
        pub status: u64,
    }

    impl SecureMonitor for RecordingMonitor {
        fn call(&mut self, params: &mut SmcParams) {
            self.calls.push(*params);
            let addr = (params.reg[1] | (params.reg[2] << 32)) as usize;
            let len = params.reg[3] as usize;
            // SAFETY: the caller keeps the map alive for the duration of the call.
            let map = unsafe { core::slice::from_raw_parts(addr as *const u8, len) };
            self.maps.push(map.to_vec());
            params.reg[0] = self.status;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_helper::*;
    use super::*;
    use alloc::vec;

    fn update(tree: &mut DeviceTree, board: &Board) -> RecordingMonitor {
        let mut mon = RecordingMonitor::default();
        update_dtb(tree, board, &mut mon, "androidboot.serialno=1").unwrap();
        mon
    }

    #[test]
    fn memory_is_aligned_and_registered_with_tos() {
        let board = Board {
            memory: vec![
                MemBlock { base: 0x8010_0000, size: 0x0050_0000 },
                MemBlock { base: 0x9000_0000, size: 0x0000_1000 },
                MemBlock { base: 0xA000_0000, size: 0x1000_0000 },
            ],
            ..Board::default()
        };
        let mut tree = DeviceTree::new();
        let mon = update(&mut tree, &board);

        let mem = tree.find_node("/memory").unwrap();
        assert_eq!(tree.property_str(mem, "device_type"), Some("memory"));
        let reg = tree.property(mem, "reg").unwrap();
        let cells: Vec<u64> = reg
            .chunks(8)
            .map(|c| u64::from_be_bytes(c.try_into().unwrap()))
            .collect();
        // 0x80100000 + 5 MiB -> [0x80200000, 4 MiB); the 4 KiB block vanishes.
        assert_eq!(cells, vec![0x8020_0000, 0x40_0000, 0xA000_0000, 0x1000_0000]);

        assert_eq!(mon.calls.len(), 1);
        assert_eq!(mon.calls[0].reg[0], SMC_FC_REGISTER_NS_DRAM_RANGES as u64);
        assert_eq!(mon.calls[0].reg[3], TOS_NS_MEM_MAP_SIZE_MAX as u64);
        let map = &mon.maps[0];
        assert_eq!(&map[0..4], &0xfeed_beefu32.to_le_bytes());
        assert_eq!(&map[4..8], &1u32.to_le_bytes());
        assert_eq!(&map[8..12], &2u32.to_le_bytes());
        assert_eq!(&map[14..22], &0x8020_0000u64.to_le_bytes());
    }

    #[test]
    fn odmdata_bit6_clips_at_4g() {
        let board = Board {
            memory: vec![
                MemBlock { base: 0x8000_0000, size: 0x2_0000_0000 },
                MemBlock { base: 0x2_0000_0000, size: 0x1000_0000 },
            ],
            odmdata: 1 << 6,
            ..Board::default()
        };
        assert_eq!(
            usable_memory(&board),
            vec![MemBlock { base: 0x8000_0000, size: 0x1_0000_0000 }]
        );
    }

    #[test]
    fn memory_list_stops_at_max_chunks() {
        let board = Board {
            memory: (0..25)
                .map(|i| MemBlock { base: 0x8000_0000 + i * 0x1000_0000, size: 0x20_0000 })
                .collect(),
            ..Board::default()
        };
        assert_eq!(usable_memory(&board).len(), MAX_MEM_CHUNKS);
    }

    #[test]
    fn tos_failure_is_not_fatal() {
        let mut tree = DeviceTree::new();
        let mut mon = RecordingMonitor { status: 1, ..Default::default() };
        update_dtb(&mut tree, &Board::default(), &mut mon, "").unwrap();
        assert!(tree.find_node("/memory").is_some());
    }

    #[test]
    fn bpmp_and_initrd_cells() {
        let board = Board {
            initrd: Some(MemBlock { base: 0x8520_0000, size: 0x10_0000 }),
            ..Board::default()
        };
        let mut tree = DeviceTree::new();
        update(&mut tree, &board);

        let bpmp = tree.find_node("/bpmp").unwrap();
        assert_eq!(tree.property(bpmp, "carveout-start"), Some(&0xF000_0000u32.to_be_bytes()[..]));
        assert_eq!(tree.property(bpmp, "carveout-size"), Some(&0x20_0000u32.to_be_bytes()[..]));
        let chosen = tree.find_node("/chosen").unwrap();
        assert_eq!(tree.property(chosen, "linux,initrd-start"), Some(&0x8520_0000u32.to_be_bytes()[..]));
        assert_eq!(tree.property(chosen, "linux,initrd-end"), Some(&0x8530_0000u32.to_be_bytes()[..]));
    }

    #[test]
    fn empty_bpmp_carveout_is_skipped() {
        let board = Board { bpmp: MemBlock::default(), ..Board::default() };
        let mut tree = DeviceTree::new();
        update(&mut tree, &board);
        let bpmp = tree.find_node("/bpmp").unwrap();
        assert!(tree.property(bpmp, "carveout-start").is_none());
        let chosen = tree.find_node("/chosen").unwrap();
        assert!(tree.property(chosen, "linux,initrd-start").is_none());
    }

    #[test]
    fn bootargs_merge_and_console_override() {
        let mut tree = DeviceTree::new();
        let chosen = tree.add_subnode_if_absent(DeviceTree::ROOT, "chosen").unwrap();
        tree.set_property_string(chosen, "bootargs", "console=ttyS0,115200 rw").unwrap();

        let board = Board { console: DebugConsole::None, ..Board::default() };
        update(&mut tree, &board);
        assert_eq!(
            tree.property_str(chosen, "bootargs"),
            Some("console=none rw androidboot.serialno=1 ")
        );
    }

    #[test]
    fn oversized_bootargs_are_truncated() {
        let mut tree = DeviceTree::new();
        let chosen = tree.add_subnode_if_absent(DeviceTree::ROOT, "chosen").unwrap();
        tree.set_property_string(chosen, "bootargs", &"a".repeat(3000)).unwrap();
        update(&mut tree, &Board::default());
        assert_eq!(tree.property(chosen, "bootargs").unwrap().len(), MAX_COMMAND_LINE_SIZE);
    }

    #[test]
    fn odm_data_flags_follow_mask() {
        let board = Board {
            odmdata: 0x0009_0000,
            params: vec![
                OdmDataParam { mask: 0x0001_0000, val: 0x0001_0000, name: "enable-sata" },
                OdmDataParam { mask: 0x0006_0000, val: 0x0002_0000, name: "enable-pcie" },
                OdmDataParam { mask: 0x0008_0000, val: 0x0008_0000, name: "enable-xusb" },
            ],
            ..Board::default()
        };
        let mut tree = DeviceTree::new();
        update(&mut tree, &board);
        let odm = tree.find_node("/chosen/plugin-manager/odm-data").unwrap();
        assert_eq!(tree.property(odm, "enable-sata"), Some(&[0, 0, 0, 1][..]));
        assert!(tree.property(odm, "enable-pcie").is_none());
        assert!(tree.property(odm, "enable-xusb").is_some());
    }

    #[test]
    fn tos_node_and_serial_number() {
        let mut tree = DeviceTree::new();
        tree.add_subnode_if_absent(DeviceTree::ROOT, "trusty").unwrap();
        let board = Board { tos: SecureOs::Trusty, ..Board::default() };
        update(&mut tree, &board);
        let trusty = tree.find_node("/trusty").unwrap();
        assert_eq!(tree.property_str(trusty, "status"), Some("okay"));
        assert_eq!(
            tree.property_str(DeviceTree::ROOT, "serial-number"),
            Some("0421617029447")
        );
    }

    #[test]
    fn missing_tos_node_and_serial_are_tolerated() {
        let board = Board { tos: SecureOs::Tlk, serial: None, ..Board::default() };
        let mut tree = DeviceTree::new();
        update(&mut tree, &board);
        assert!(tree.find_node("/tlk").is_none());
        assert!(tree.property(DeviceTree::ROOT, "serial-number").is_none());
    }

    struct WithExtras(Board);

    fn fill_cpu_tag(tree: &mut DeviceTree, node: NodeId) -> Result<()> {
        tree.set_property_string(node, "nvidia,boot-cluster", "denver")
    }

    const EXTRAS: &[DtNodeInfo] = &[DtNodeInfo { node_name: "cpus", fill: fill_cpu_tag }];

    impl LinuxBootHelper for WithExtras {
        fn memory_block(&self, idx: usize) -> Result<MemBlock> {
            self.0.memory_block(idx)
        }
        fn initrd(&self) -> Option<MemBlock> {
            None
        }
        fn bpmp_carveout(&self) -> Result<MemBlock> {
            self.0.bpmp_carveout()
        }
        fn debug_console(&self) -> Result<DebugConsole> {
            Err(Error::NotSupported)
        }
        fn secure_os(&self) -> Result<SecureOs> {
            Err(Error::NotSupported)
        }
        fn serial_number(&self) -> Result<String> {
            self.0.serial_number()
        }
        fn odmdata(&self) -> u32 {
            0
        }
        fn odmdata_params(&self) -> Result<&[OdmDataParam]> {
            Ok(&[])
        }
        fn extra_nodes(&self) -> &[DtNodeInfo] {
            EXTRAS
        }
    }

    #[test]
    fn extra_nodes_are_filled() {
        let mut tree = DeviceTree::new();
        let mut mon = RecordingMonitor::default();
        update_dtb(&mut tree, &WithExtras(Board::default()), &mut mon, "").unwrap();
        let cpus = tree.find_node("/cpus").unwrap();
        assert_eq!(tree.property_str(cpus, "nvidia,boot-cluster"), Some("denver"));
    }

    #[test]
    fn board_ids_go_under_plugin_manager() {
        let board = Board {
            board_ids: vec!["3310-1000-B00".to_string(), "3489-0000-A00".to_string()],
            ..Board::default()
        };
        let mut tree = DeviceTree::new();
        let chosen = tree.add_subnode_if_absent(DeviceTree::ROOT, "chosen").unwrap();
        let mut ctx = Ctx { helper: &board, monitor: &mut (), bootimg_cmdline: "" };
        add_plugin_manager_ids(&mut ctx, &mut tree, chosen).unwrap();

        let ids = tree.find_node("/chosen/plugin-manager/ids").unwrap();
        assert_eq!(tree.property_str(ids, "3310-1000-B00"), Some(""));
        assert!(tree.property(ids, "3489-0000-A00").is_some());

        let mut bare = DeviceTree::new();
        let chosen = bare.add_subnode_if_absent(DeviceTree::ROOT, "chosen").unwrap();
        let mut ctx = Ctx { helper: &Board::default(), monitor: &mut (), bootimg_cmdline: "" };
        add_plugin_manager_ids(&mut ctx, &mut bare, chosen).unwrap();
        assert!(bare.find_node("/chosen/plugin-manager").is_none());
    }
}
