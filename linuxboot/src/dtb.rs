//! Editable in-memory device tree.
//!
//! The kernel DTB is parsed once with the `fdt` crate into an arena of
//! nodes, patched by the loader, then flattened again with enough slack
//! for the kernel's own early fix-ups. Only node and property insertion is
//! supported; phandles and overlays are left alone.

use alloc::string::String;
use alloc::vec::Vec;
use bootcore::{Error, Result};

const FDT_MAGIC: u32 = 0xd00d_feed;
const FDT_VERSION: u32 = 17;
const FDT_LAST_COMP_VERSION: u32 = 16;
const FDT_HEADER_SIZE: usize = 40;

const FDT_BEGIN_NODE: u32 = 0x1;
const FDT_END_NODE: u32 = 0x2;
const FDT_PROP: u32 = 0x3;
const FDT_END: u32 = 0x9;

/// Handle to a node inside a [`DeviceTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeId(usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub name: String,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone)]
struct Node {
    name: String,
    props: Vec<Property>,
    children: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct DeviceTree {
    nodes: Vec<Node>,
    reservations: Vec<(u64, u64)>,
    boot_cpuid: u32,
}

impl Default for DeviceTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceTree {
    pub const ROOT: NodeId = NodeId(0);

    /// An empty tree holding only the root node.
    pub fn new() -> Self {
        Self {
            nodes: alloc::vec![Node {
                name: String::new(),
                props: Vec::new(),
                children: Vec::new(),
            }],
            reservations: Vec::new(),
            boot_cpuid: 0,
        }
    }

    /// Parse a flattened device tree blob.
    pub fn from_blob(blob: &[u8]) -> Result<Self> {
        let fdt = fdt::Fdt::new(blob).map_err(|e| {
            log::error!("invalid DTB: {:?}", e);
            Error::DtInvalid
        })?;

        let mut tree = Self::new();
        tree.boot_cpuid = blob
            .get(28..32)
            .map_or(0, |b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]));
        tree.reservations = fdt
            .memory_reservations()
            .map(|r| (r.address() as u64, r.size() as u64))
            .collect();

        let root = fdt.find_node("/").ok_or(Error::DtInvalid)?;
        tree.import(Self::ROOT, root);
        Ok(tree)
    }

    fn import(&mut self, id: NodeId, node: fdt::node::FdtNode<'_, '_>) {
        for prop in node.properties() {
            self.nodes[id.0].props.push(Property {
                name: String::from(prop.name),
                value: prop.value.to_vec(),
            });
        }
        for child in node.children() {
            let child_id = self.push_node(id, child.name);
            self.import(child_id, child);
        }
    }

    fn push_node(&mut self, parent: NodeId, name: &str) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            name: String::from(name),
            props: Vec::new(),
            children: Vec::new(),
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(id.0).ok_or(Error::DtNodeNotFound)
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes.get_mut(id.0).ok_or(Error::DtNodeNotFound)
    }

    pub fn node_name(&self, id: NodeId) -> Result<&str> {
        Ok(&self.node(id)?.name)
    }

    pub fn boot_cpuid(&self) -> u32 {
        self.boot_cpuid
    }

    pub fn reservations(&self) -> &[(u64, u64)] {
        &self.reservations
    }

    pub fn add_reservation(&mut self, base: u64, size: u64) {
        self.reservations.push((base, size));
    }

    /// Direct child of `parent` called `name`.
    ///
    /// A name without a unit address also matches `name@unit`.
    pub fn subnode(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        let node = self.nodes.get(parent.0)?;
        node.children.iter().copied().find(|c| {
            let child = &self.nodes[c.0].name;
            child == name
                || (!name.contains('@')
                    && child.split_once('@').is_some_and(|(base, _)| base == name))
        })
    }

    /// Resolve an absolute path such as `/chosen/plugin-manager`.
    pub fn find_node(&self, path: &str) -> Option<NodeId> {
        let rel = path.strip_prefix('/')?;
        rel.split('/')
            .filter(|c| !c.is_empty())
            .try_fold(Self::ROOT, |node, comp| self.subnode(node, comp))
    }

    /// Existing child `name` of `parent`, or a freshly added one.
    pub fn add_subnode_if_absent(&mut self, parent: NodeId, name: &str) -> Result<NodeId> {
        if let Some(id) = self.subnode(parent, name) {
            return Ok(id);
        }
        if name.is_empty() || name.contains('/') {
            return Err(Error::DtNodeAddFailed);
        }
        self.node(parent)?;
        Ok(self.push_node(parent, name))
    }

    pub fn property(&self, node: NodeId, name: &str) -> Option<&[u8]> {
        self.nodes
            .get(node.0)?
            .props
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_slice())
    }

    pub fn properties(&self, node: NodeId) -> Result<&[Property]> {
        Ok(&self.node(node)?.props)
    }

    /// Create or overwrite a property.
    pub fn set_property(&mut self, node: NodeId, name: &str, value: &[u8]) -> Result<()> {
        if name.is_empty() {
            return Err(Error::DtPropAddFailed);
        }
        let props = &mut self.node_mut(node)?.props;
        match props.iter_mut().find(|p| p.name == name) {
            Some(p) => {
                p.value.clear();
                p.value.extend_from_slice(value);
            }
            None => props.push(Property {
                name: String::from(name),
                value: value.to_vec(),
            }),
        }
        Ok(())
    }

    /// Single big-endian cell.
    pub fn set_property_u32(&mut self, node: NodeId, name: &str, value: u32) -> Result<()> {
        self.set_property(node, name, &value.to_be_bytes())
    }

    /// Array of big-endian 64-bit values.
    pub fn set_property_u64s(&mut self, node: NodeId, name: &str, values: &[u64]) -> Result<()> {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_be_bytes()).collect();
        self.set_property(node, name, &bytes)
    }

    /// NUL-terminated string.
    pub fn set_property_string(&mut self, node: NodeId, name: &str, value: &str) -> Result<()> {
        let mut bytes = Vec::with_capacity(value.len() + 1);
        bytes.extend_from_slice(value.as_bytes());
        bytes.push(0);
        self.set_property(node, name, &bytes)
    }

    /// String property without its terminator.
    pub fn property_str(&self, node: NodeId, name: &str) -> Option<&str> {
        let raw = self.property(node, name)?;
        let raw = raw.split(|&b| b == 0).next().unwrap_or(raw);
        core::str::from_utf8(raw).ok()
    }

    /// Flatten into a version 17 blob.
    pub fn to_blob(&self) -> Vec<u8> {
        let mut strings = StringTable::default();
        let mut structure = Vec::new();
        self.flatten(Self::ROOT, &mut structure, &mut strings);
        put_u32(&mut structure, FDT_END);

        let rsv_off = FDT_HEADER_SIZE;
        let rsv_size = (self.reservations.len() + 1) * 16;
        let struct_off = rsv_off + rsv_size;
        let strings_off = struct_off + structure.len();
        let total = strings_off + strings.bytes.len();

        let mut blob = Vec::with_capacity(total);
        for word in [
            FDT_MAGIC,
            total as u32,
            struct_off as u32,
            strings_off as u32,
            rsv_off as u32,
            FDT_VERSION,
            FDT_LAST_COMP_VERSION,
            self.boot_cpuid,
            strings.bytes.len() as u32,
            structure.len() as u32,
        ] {
            put_u32(&mut blob, word);
        }
        for &(base, size) in &self.reservations {
            blob.extend_from_slice(&base.to_be_bytes());
            blob.extend_from_slice(&size.to_be_bytes());
        }
        blob.extend_from_slice(&[0; 16]);
        blob.extend_from_slice(&structure);
        blob.extend_from_slice(&strings.bytes);
        blob
    }

    /// Flatten and pad so that `extra` bytes stay free inside the blob.
    ///
    /// Fails with [`Error::Overflow`] when the padded blob exceeds `max_size`.
    pub fn to_blob_with_space(&self, extra: usize, max_size: usize) -> Result<Vec<u8>> {
        let mut blob = self.to_blob();
        let total = blob.len() + extra;
        if total > max_size {
            log::error!("DTB needs {:#x} bytes, limit is {:#x}", total, max_size);
            return Err(Error::Overflow);
        }
        blob.resize(total, 0);
        blob[4..8].copy_from_slice(&(total as u32).to_be_bytes());
        Ok(blob)
    }

    fn flatten(&self, id: NodeId, out: &mut Vec<u8>, strings: &mut StringTable) {
        let node = &self.nodes[id.0];
        put_u32(out, FDT_BEGIN_NODE);
        out.extend_from_slice(node.name.as_bytes());
        out.push(0);
        pad4(out);
        for prop in &node.props {
            put_u32(out, FDT_PROP);
            put_u32(out, prop.value.len() as u32);
            put_u32(out, strings.offset_of(&prop.name));
            out.extend_from_slice(&prop.value);
            pad4(out);
        }
        for &child in &node.children {
            self.flatten(child, out, strings);
        }
        put_u32(out, FDT_END_NODE);
    }
}

#[derive(Default)]
struct StringTable {
    bytes: Vec<u8>,
}

impl StringTable {
    fn offset_of(&mut self, name: &str) -> u32 {
        let mut off = 0;
        while off < self.bytes.len() {
            let end = self.bytes[off..]
                .iter()
                .position(|&b| b == 0)
                .map_or(self.bytes.len(), |p| off + p);
            if &self.bytes[off..end] == name.as_bytes() {
                return off as u32;
            }
            off = end + 1;
        }
        let off = self.bytes.len();
        self.bytes.extend_from_slice(name.as_bytes());
        self.bytes.push(0);
        off as u32
    }
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn pad4(out: &mut Vec<u8>) {
    while out.len() % 4 != 0 {
        out.push(0);
    }
}
