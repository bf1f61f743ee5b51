//! Registry hive (regf) file reader.
//!
//! On-disk format:
//! ```text
//! +0x0000  HBASE_BLOCK ("regf" signature, 4096 bytes)
//!   +0x0000  Signature: "regf" (4 bytes)
//!   +0x0004  Primary / secondary sequence numbers (u32, u32)
//!   +0x000C  Last written (FILETIME)
//!   +0x0014  Major / minor version (u32, u32)
//!   +0x0024  RootCellOffset (u32), relative to hive data
//!   +0x0028  HiveLength (u32), total hive bins length
//!   +0x0030  File name (UTF-16LE, 64 bytes)
//! +0x1000  HBIN #0 ("hbin" signature), then cells
//!   Each cell is |size(i32)|data...|
//!     - Allocated cells have negative size (absolute value = cell size)
//!   Cell types identified by 2-byte signature:
//!     "nk" key node, "vk" key value,
//!     "lf"/"lh" fast-leaf subkey list, "li" leaf index, "ri" index root
//! ```
//!
//! All cell offsets are relative to the start of hive data (file offset
//! 0x1000). Big-data ("db") value cells are not reassembled; values larger
//! than a single cell come back truncated.

use crate::error::{RegistryError, RegistryResult};
use crate::hive_type::HiveType;
use crate::key::{join_key_path, read_utf16le_string, RegistryKey, RegistryValue};
use memmap2::{Mmap, MmapOptions};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::debug;

// ── Constants ────────────────────────────────────────────────────────

pub(crate) const REGF_SIGNATURE: &[u8; 4] = b"regf";
pub(crate) const HBIN_SIGNATURE: &[u8; 4] = b"hbin";
pub(crate) const NK_SIGNATURE: u16 = 0x6B6E; // "nk" little-endian
pub(crate) const VK_SIGNATURE: u16 = 0x6B76; // "vk" little-endian
pub(crate) const LF_SIGNATURE: u16 = 0x666C; // "lf" little-endian
const LH_SIGNATURE: u16 = 0x686C; // "lh" little-endian
const RI_SIGNATURE: u16 = 0x6972; // "ri" little-endian
const LI_SIGNATURE: u16 = 0x696C; // "li" little-endian

/// HBASE_BLOCK is always 4096 bytes.
pub const HBASE_BLOCK_SIZE: usize = 4096;

// HBASE_BLOCK field offsets
pub(crate) const REGF_SEQUENCE_PRIMARY: usize = 0x04;
pub(crate) const REGF_SEQUENCE_SECONDARY: usize = 0x08;
const REGF_LAST_WRITTEN: usize = 0x0C;
pub(crate) const REGF_MAJOR_VERSION: usize = 0x14;
pub(crate) const REGF_MINOR_VERSION: usize = 0x18;
pub(crate) const REGF_ROOT_CELL_OFFSET: usize = 0x24;
pub(crate) const REGF_HIVE_LENGTH: usize = 0x28;
pub(crate) const REGF_FILE_NAME: usize = 0x30;
pub(crate) const REGF_FILE_NAME_SIZE: usize = 64;

// NK cell offsets (relative to the 2-byte signature, after the 4-byte cell size)
pub(crate) const NK_FLAGS: usize = 2;
pub(crate) const NK_TIMESTAMP: usize = 4;
pub(crate) const NK_SUBKEY_COUNT: usize = 20;
pub(crate) const NK_SUBKEY_LIST: usize = 28;
pub(crate) const NK_VALUE_COUNT: usize = 36;
pub(crate) const NK_VALUE_LIST: usize = 40;
pub(crate) const NK_NAME_LENGTH: usize = 72;
pub(crate) const NK_NAME_START: usize = 76;

/// NK flag: KEY_HIVE_ENTRY (root key of the hive).
pub(crate) const KEY_HIVE_ENTRY: u16 = 0x0004;
/// NK flag: KEY_COMP_NAME (name is ASCII, not UTF-16).
pub(crate) const KEY_COMP_NAME: u16 = 0x0020;

// VK cell offsets (relative to sig start)
pub(crate) const VK_NAME_LENGTH: usize = 2;
pub(crate) const VK_DATA_LENGTH: usize = 4;
pub(crate) const VK_DATA_OFFSET: usize = 8;
pub(crate) const VK_TYPE: usize = 12;
pub(crate) const VK_FLAGS: usize = 16;
pub(crate) const VK_NAME_START: usize = 20;

/// VK flag: value name is ASCII (compressed).
pub(crate) const VALUE_COMP_NAME: u16 = 0x0001;

/// Bit 31 of the VK data length: data lives in the data offset field itself.
pub(crate) const VK_DATA_RESIDENT: u32 = 0x8000_0000;

/// Offset value meaning "no cell".
pub(crate) const NO_CELL: u32 = 0xFFFF_FFFF;

const MAX_LIST_ENTRIES: usize = 10_000;
const MAX_VALUE_DATA: usize = 1024 * 1024;

// ── Base block ───────────────────────────────────────────────────────

/// Parsed HBASE_BLOCK header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseBlock {
    pub primary_sequence: u32,
    pub secondary_sequence: u32,
    /// Last written time of the hive as a FILETIME.
    pub last_written: u64,
    pub major_version: u32,
    pub minor_version: u32,
    /// Root cell offset (relative to hive data, i.e., after HBASE_BLOCK).
    pub root_cell_offset: u32,
    /// Hive bins data length.
    pub hive_length: u32,
    /// Embedded file name, e.g. `\SystemRoot\System32\Config\SOFTWARE`.
    /// Often truncated to its last 31 characters.
    pub file_name: String,
}

impl BaseBlock {
    /// Parse the base block from the start of a hive file.
    pub fn parse(header: &[u8]) -> RegistryResult<Self> {
        if header.len() < HBASE_BLOCK_SIZE {
            return Err(RegistryError::Truncated {
                size: header.len(),
                needed: HBASE_BLOCK_SIZE,
            });
        }
        if &header[0..4] != REGF_SIGNATURE {
            return Err(RegistryError::InvalidSignature([
                header[0], header[1], header[2], header[3],
            ]));
        }

        let root_cell_offset = le_u32(header, REGF_ROOT_CELL_OFFSET);
        let hive_length = le_u32(header, REGF_HIVE_LENGTH);
        if hive_length == 0 {
            return Err(RegistryError::InvalidBaseBlock(
                "hive length is zero".to_string(),
            ));
        }
        if root_cell_offset >= hive_length {
            return Err(RegistryError::InvalidBaseBlock(format!(
                "root cell offset {:#x} outside hive length {:#x}",
                root_cell_offset, hive_length
            )));
        }

        Ok(BaseBlock {
            primary_sequence: le_u32(header, REGF_SEQUENCE_PRIMARY),
            secondary_sequence: le_u32(header, REGF_SEQUENCE_SECONDARY),
            last_written: le_u64(header, REGF_LAST_WRITTEN),
            major_version: le_u32(header, REGF_MAJOR_VERSION),
            minor_version: le_u32(header, REGF_MINOR_VERSION),
            root_cell_offset,
            hive_length,
            file_name: read_utf16le_string(
                &header[REGF_FILE_NAME..REGF_FILE_NAME + REGF_FILE_NAME_SIZE],
            ),
        })
    }

    /// Mismatched sequence numbers mean the hive was not cleanly flushed and
    /// pending changes may live in transaction logs.
    pub fn is_dirty(&self) -> bool {
        self.primary_sequence != self.secondary_sequence
    }
}

// ── Hive file ────────────────────────────────────────────────────────

enum HiveData {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl HiveData {
    fn as_slice(&self) -> &[u8] {
        match self {
            HiveData::Mapped(mmap) => mmap.as_ref(),
            HiveData::Owned(bytes) => bytes,
        }
    }
}

/// A registry hive file, memory-mapped or held in memory.
pub struct HiveFile {
    data: HiveData,
    base_block: BaseBlock,
    source: Option<PathBuf>,
}

impl HiveFile {
    /// Memory-map and validate a hive file.
    pub fn open(path: impl AsRef<Path>) -> RegistryResult<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let size = file.metadata()?.len() as usize;
        if size < HBASE_BLOCK_SIZE {
            return Err(RegistryError::Truncated {
                size,
                needed: HBASE_BLOCK_SIZE,
            });
        }
        // The file is opened read-only and never written through this map.
        let mmap = unsafe { MmapOptions::new().map(&file)? };
        let base_block = BaseBlock::parse(&mmap)?;
        debug!(
            "registry: opened hive '{}' ({} bytes, embedded name '{}')",
            path.display(),
            size,
            base_block.file_name
        );
        Ok(HiveFile {
            data: HiveData::Mapped(mmap),
            base_block,
            source: Some(path.to_path_buf()),
        })
    }

    /// Validate a hive held in memory.
    pub fn from_bytes(bytes: Vec<u8>) -> RegistryResult<Self> {
        let base_block = BaseBlock::parse(&bytes)?;
        Ok(HiveFile {
            data: HiveData::Owned(bytes),
            base_block,
            source: None,
        })
    }

    pub fn base_block(&self) -> &BaseBlock {
        &self.base_block
    }

    /// Path the hive was opened from, if any.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Classify the hive from its embedded file name, falling back to the
    /// name of the file it was opened from.
    pub fn hive_type(&self) -> HiveType {
        match HiveType::from_hive_name(&self.base_block.file_name) {
            HiveType::Unknown => self
                .source
                .as_ref()
                .and_then(|p| p.file_name())
                .map(|n| HiveType::from_hive_name(&n.to_string_lossy()))
                .unwrap_or(HiveType::Unknown),
            known => known,
        }
    }

    /// Reader over the hive bins area.
    pub fn reader(&self) -> HiveReader<'_> {
        let bytes = self.data.as_slice();
        let bins = &bytes[HBASE_BLOCK_SIZE.min(bytes.len())..];
        if bins.len() < 4 || &bins[0..4] != HBIN_SIGNATURE {
            debug!("registry: first hive bin has no 'hbin' signature");
        }
        HiveReader::new(bins, self.base_block.hive_length)
    }

    /// The root key (path `\`).
    pub fn root_key(&self) -> RegistryResult<HiveKey<'_>> {
        let reader = self.reader();
        let node = reader.read_key_node(self.base_block.root_cell_offset)?;
        if node.flags & KEY_HIVE_ENTRY == 0 {
            debug!("registry: root key '{}' lacks KEY_HIVE_ENTRY", node.name);
        }
        Ok(HiveKey {
            reader,
            node,
            path: "\\".to_string(),
        })
    }

    /// Navigate from the root to `path`.
    pub fn open_key(&self, path: &str) -> RegistryResult<HiveKey<'_>> {
        self.root_key()?
            .open_path(path)
            .ok_or_else(|| RegistryError::KeyNotFound(path.to_string()))
    }
}

// ── Cell reader ──────────────────────────────────────────────────────

/// A parsed key node (NK cell).
#[derive(Debug, Clone)]
pub struct KeyNode {
    /// Cell offset (relative to hive data).
    pub cell_offset: u32,
    pub name: String,
    pub flags: u16,
    /// Last written time as a FILETIME.
    pub last_written: u64,
    pub subkey_count: u32,
    pub subkey_list_offset: u32,
    pub value_count: u32,
    pub value_list_offset: u32,
}

/// Reader for cells in the hive bins area.
#[derive(Clone, Copy)]
pub struct HiveReader<'a> {
    /// Hive data, starting at the first hbin.
    data: &'a [u8],
    /// Hive data length from the base block.
    hive_length: u32,
}

impl<'a> HiveReader<'a> {
    pub fn new(data: &'a [u8], hive_length: u32) -> Self {
        HiveReader { data, hive_length }
    }

    /// Borrow `length` bytes at a cell offset, including the 4-byte size prefix.
    fn cell_bytes(&self, cell_offset: u32, length: usize) -> RegistryResult<&'a [u8]> {
        let start = cell_offset as usize;
        let end = start.checked_add(length);
        match end {
            Some(end) if cell_offset < self.hive_length && end <= self.data.len() => {
                Ok(&self.data[start..end])
            }
            _ => Err(RegistryError::CellOutOfBounds {
                offset: cell_offset,
                length,
                available: self.data.len(),
            }),
        }
    }

    /// Absolute size of a cell (allocated cells store it negated).
    fn cell_size(&self, cell_offset: u32) -> RegistryResult<usize> {
        let bytes = self.cell_bytes(cell_offset, 4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]).unsigned_abs() as usize)
    }

    /// Read a key node (NK record) at the given cell offset.
    pub fn read_key_node(&self, cell_offset: u32) -> RegistryResult<KeyNode> {
        let cell = self.cell_bytes(cell_offset, 4 + NK_NAME_START)?;
        let nk = &cell[4..];

        let sig = le_u16(nk, 0);
        if sig != NK_SIGNATURE {
            return Err(RegistryError::UnexpectedCell {
                offset: cell_offset,
                expected: "nk",
                found: sig,
            });
        }

        let flags = le_u16(nk, NK_FLAGS);
        let name_length = le_u16(nk, NK_NAME_LENGTH) as usize;
        let name = if name_length > 0 {
            let name_data = self.cell_bytes(cell_offset, 4 + NK_NAME_START + name_length)?;
            let name_bytes = &name_data[4 + NK_NAME_START..];
            if flags & KEY_COMP_NAME != 0 {
                // Compressed names are Latin-1
                name_bytes.iter().map(|&b| b as char).collect()
            } else {
                read_utf16le_string(name_bytes)
            }
        } else {
            String::new()
        };

        Ok(KeyNode {
            cell_offset,
            name,
            flags,
            last_written: le_u64(nk, NK_TIMESTAMP),
            subkey_count: le_u32(nk, NK_SUBKEY_COUNT),
            subkey_list_offset: le_u32(nk, NK_SUBKEY_LIST),
            value_count: le_u32(nk, NK_VALUE_COUNT),
            value_list_offset: le_u32(nk, NK_VALUE_LIST),
        })
    }

    /// Enumerate subkeys of a key node. Unreadable children are skipped.
    pub fn subkeys(&self, key: &KeyNode) -> RegistryResult<Vec<KeyNode>> {
        if key.subkey_count == 0 || key.subkey_list_offset == NO_CELL {
            return Ok(Vec::new());
        }

        let offsets = self.read_subkey_list(key.subkey_list_offset, true)?;
        let mut subkeys = Vec::with_capacity(offsets.len());
        for off in offsets {
            match self.read_key_node(off) {
                Ok(k) => subkeys.push(k),
                Err(e) => debug!("registry: skipping bad subkey at {:#x}: {}", off, e),
            }
        }
        Ok(subkeys)
    }

    /// Read a subkey list (lf/lh/ri/li record) and return child cell offsets.
    ///
    /// An index root may only point at leaf lists, never at another index root.
    fn read_subkey_list(&self, cell_offset: u32, allow_index_root: bool) -> RegistryResult<Vec<u32>> {
        // Cell: i32 size | u16 sig | u16 count | entries...
        let header = self.cell_bytes(cell_offset, 8)?;
        let sig = le_u16(header, 4);
        let count = le_u16(header, 6) as usize;

        if count > MAX_LIST_ENTRIES {
            return Err(RegistryError::ListTooLarge {
                kind: "subkey list",
                offset: cell_offset,
                count,
            });
        }

        let entry_size = match sig {
            // u32 cell offset + u32 name hash
            LF_SIGNATURE | LH_SIGNATURE => 8,
            LI_SIGNATURE => 4,
            RI_SIGNATURE if allow_index_root => 4,
            _ => {
                return Err(RegistryError::UnexpectedCell {
                    offset: cell_offset,
                    expected: "subkey list",
                    found: sig,
                })
            }
        };

        let data = self.cell_bytes(cell_offset, 8 + count * entry_size)?;
        let entries = (0..count).map(|i| le_u32(data, 8 + i * entry_size));

        if sig != RI_SIGNATURE {
            return Ok(entries.collect());
        }

        let mut offsets = Vec::new();
        for sub_list_offset in entries {
            match self.read_subkey_list(sub_list_offset, false) {
                Ok(sub_offsets) => offsets.extend(sub_offsets),
                Err(e) => debug!(
                    "registry: skipping bad ri sub-list at {:#x}: {}",
                    sub_list_offset, e
                ),
            }
        }
        Ok(offsets)
    }

    /// Enumerate values of a key node. Unreadable values are skipped.
    pub fn values(&self, key: &KeyNode) -> RegistryResult<Vec<RegistryValue>> {
        if key.value_count == 0 || key.value_list_offset == NO_CELL {
            return Ok(Vec::new());
        }
        let count = key.value_count as usize;
        if count > MAX_LIST_ENTRIES {
            return Err(RegistryError::ListTooLarge {
                kind: "value list",
                offset: key.value_list_offset,
                count,
            });
        }

        // Value list is a cell containing an array of u32 cell offsets
        let list_data = self.cell_bytes(key.value_list_offset, 4 + count * 4)?;

        let mut values = Vec::with_capacity(count);
        for i in 0..count {
            let vk_offset = le_u32(list_data, 4 + i * 4);
            match self.read_value(vk_offset) {
                Ok(v) => values.push(v),
                Err(e) => debug!("registry: skipping bad value at {:#x}: {}", vk_offset, e),
            }
        }
        Ok(values)
    }

    /// Read a single value (VK record).
    fn read_value(&self, cell_offset: u32) -> RegistryResult<RegistryValue> {
        let header = self.cell_bytes(cell_offset, 4 + VK_NAME_START)?;
        let vk = &header[4..];

        let sig = le_u16(vk, 0);
        if sig != VK_SIGNATURE {
            return Err(RegistryError::UnexpectedCell {
                offset: cell_offset,
                expected: "vk",
                found: sig,
            });
        }

        let name_length = le_u16(vk, VK_NAME_LENGTH) as usize;
        let data_length_raw = le_u32(vk, VK_DATA_LENGTH);
        let data_offset = le_u32(vk, VK_DATA_OFFSET);
        let value_type = le_u32(vk, VK_TYPE);
        let vk_flags = le_u16(vk, VK_FLAGS);

        let name = if name_length > 0 {
            let name_data = self.cell_bytes(cell_offset, 4 + VK_NAME_START + name_length)?;
            let name_bytes = &name_data[4 + VK_NAME_START..];
            if vk_flags & VALUE_COMP_NAME != 0 {
                name_bytes.iter().map(|&b| b as char).collect()
            } else {
                read_utf16le_string(name_bytes)
            }
        } else {
            String::new() // (Default) value
        };

        let data_is_resident = data_length_raw & VK_DATA_RESIDENT != 0;
        let data_length = (data_length_raw & !VK_DATA_RESIDENT) as usize;

        let raw_data = if data_length == 0 {
            Vec::new()
        } else if data_is_resident {
            let inline_len = data_length.min(4);
            data_offset.to_le_bytes()[..inline_len].to_vec()
        } else {
            self.read_value_data(data_offset, data_length)?
        };

        Ok(RegistryValue {
            name,
            value_type,
            raw_data,
        })
    }

    /// Read value data from a data cell, bounded by the cell's own size.
    fn read_value_data(&self, cell_offset: u32, length: usize) -> RegistryResult<Vec<u8>> {
        let available = self.cell_size(cell_offset)?.saturating_sub(4);
        let actual = length.min(available).min(MAX_VALUE_DATA);
        if actual < length {
            debug!(
                "registry: value data at {:#x} truncated to {} of {} bytes",
                cell_offset, actual, length
            );
        }
        let cell = self.cell_bytes(cell_offset, 4 + actual)?;
        Ok(cell[4..].to_vec())
    }
}

// ── RegistryKey implementation ───────────────────────────────────────

/// A key inside a [`HiveFile`].
#[derive(Clone)]
pub struct HiveKey<'a> {
    reader: HiveReader<'a>,
    node: KeyNode,
    path: String,
}

impl<'a> HiveKey<'a> {
    pub fn node(&self) -> &KeyNode {
        &self.node
    }

    fn child(&self, node: KeyNode) -> HiveKey<'a> {
        HiveKey {
            reader: self.reader,
            path: join_key_path(&self.path, &node.name),
            node,
        }
    }
}

impl<'a> RegistryKey for HiveKey<'a> {
    fn name(&self) -> &str {
        &self.node.name
    }

    fn path(&self) -> &str {
        &self.path
    }

    /// File offset of the NK cell.
    fn offset(&self) -> u64 {
        (HBASE_BLOCK_SIZE + self.node.cell_offset as usize) as u64
    }

    fn last_written_timestamp(&self) -> u64 {
        self.node.last_written
    }

    fn subkey(&self, name: &str) -> Option<Self> {
        self.subkeys()
            .into_iter()
            .find(|k| k.node.name.eq_ignore_ascii_case(name))
    }

    fn subkeys(&self) -> Vec<Self> {
        match self.reader.subkeys(&self.node) {
            Ok(nodes) => nodes.into_iter().map(|n| self.child(n)).collect(),
            Err(e) => {
                debug!("registry: cannot list subkeys of '{}': {}", self.path, e);
                Vec::new()
            }
        }
    }

    fn value(&self, name: &str) -> Option<RegistryValue> {
        match self.reader.values(&self.node) {
            Ok(values) => values
                .into_iter()
                .find(|v| v.name.eq_ignore_ascii_case(name)),
            Err(e) => {
                debug!("registry: cannot list values of '{}': {}", self.path, e);
                None
            }
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

// Callers bounds-check the slice before decoding fixed fields.
fn le_u16(data: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([data[at], data[at + 1]])
}

fn le_u32(data: &[u8], at: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&data[at..at + 4]);
    u32::from_le_bytes(buf)
}

fn le_u64(data: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&data[at..at + 8]);
    u64::from_le_bytes(buf)
}

// ── Tests ────────────────────────────────────────────────────────────
