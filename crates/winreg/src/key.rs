//! Store-independent view of registry keys and values.
//!
//! Consumers (plugins) only ever see a [`RegistryKey`]: a named node with
//! child keys, named values, a last-written FILETIME, a path and a byte
//! offset. Both the regf file reader and the in-memory tree implement it.

use serde::{Deserialize, Serialize};

/// Registry value types.
pub mod reg_types {
    pub const REG_NONE: u32 = 0;
    pub const REG_SZ: u32 = 1;
    pub const REG_EXPAND_SZ: u32 = 2;
    pub const REG_BINARY: u32 = 3;
    pub const REG_DWORD: u32 = 4;
    pub const REG_DWORD_BIG_ENDIAN: u32 = 5;
    pub const REG_LINK: u32 = 6;
    pub const REG_MULTI_SZ: u32 = 7;
    pub const REG_QWORD: u32 = 11;
}

/// A named value attached to a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryValue {
    /// Value name (empty string = "(Default)" value).
    pub name: String,
    /// Value type (REG_SZ=1, REG_BINARY=3, ...).
    pub value_type: u32,
    /// Raw value data bytes.
    pub raw_data: Vec<u8>,
}

impl RegistryValue {
    pub fn new(name: impl Into<String>, value_type: u32, raw_data: Vec<u8>) -> Self {
        RegistryValue {
            name: name.into(),
            value_type,
            raw_data,
        }
    }

    /// A `REG_SZ` value holding `text` as UTF-16LE with a terminating NUL.
    pub fn string(name: impl Into<String>, text: &str) -> Self {
        Self::new(name, reg_types::REG_SZ, encode_utf16le_nul(text))
    }

    /// A `REG_BINARY` value.
    pub fn binary(name: impl Into<String>, raw_data: Vec<u8>) -> Self {
        Self::new(name, reg_types::REG_BINARY, raw_data)
    }

    /// Decode the data as a UTF-16LE string, stopping at the first NUL.
    pub fn string_data(&self) -> String {
        read_utf16le_string(&self.raw_data)
    }
}

/// Read-only access to a registry key.
///
/// Name lookups are ASCII case-insensitive, like the registry itself.
/// Handles are cheap to clone; `subkey`/`subkeys` return new handles rather
/// than borrowing, so walkers can keep them on a work stack.
pub trait RegistryKey: Sized + Clone {
    /// Key name (last path component).
    fn name(&self) -> &str;

    /// Full key path, backslash separated (`\` for the root).
    fn path(&self) -> &str;

    /// Byte offset of the key within the store.
    fn offset(&self) -> u64;

    /// Last-written time as a FILETIME.
    fn last_written_timestamp(&self) -> u64;

    /// Look up a direct child key by name.
    fn subkey(&self, name: &str) -> Option<Self>;

    /// All direct child keys.
    fn subkeys(&self) -> Vec<Self>;

    /// Look up a value by name.
    fn value(&self, name: &str) -> Option<RegistryValue>;

    /// Navigate to a descendant key by path (e.g. `Microsoft\Windows NT`).
    ///
    /// Empty components are ignored, so leading/trailing backslashes are fine.
    fn open_path(&self, path: &str) -> Option<Self> {
        let mut current = self.clone();
        for component in path.split('\\').filter(|c| !c.is_empty()) {
            current = current.subkey(component)?;
        }
        Some(current)
    }
}

/// Join a parent key path and a child name.
pub fn join_key_path(parent: &str, name: &str) -> String {
    if parent.is_empty() || parent == "\\" {
        format!("\\{}", name)
    } else {
        format!("{}\\{}", parent, name)
    }
}

/// Decode a UTF-16LE string from raw bytes, stopping at first null or end.
pub fn read_utf16le_string(data: &[u8]) -> String {
    let chars: Vec<u16> = data
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .take_while(|&c| c != 0)
        .collect();
    String::from_utf16_lossy(&chars)
}

/// Encode a string as UTF-16LE followed by a NUL code unit, the way `REG_SZ`
/// data is stored.
pub fn encode_utf16le_nul(text: &str) -> Vec<u8> {
    text.encode_utf16()
        .chain(std::iter::once(0))
        .flat_map(|c| c.to_le_bytes())
        .collect()
}
