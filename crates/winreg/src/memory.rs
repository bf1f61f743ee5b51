//! In-memory registry trees.
//!
//! [`MemoryKey`] is an immutable, cheaply cloneable key tree. It is built
//! with [`KeyBuilder`] or loaded from a JSON [`HiveSnapshot`]:
//!
//! ```json
//! {
//!   "hive_type": "SOFTWARE",
//!   "root": {
//!     "name": "ROOT",
//!     "subkeys": [
//!       { "name": "Tree", "last_written": 130000000000000000,
//!         "values": [ { "name": "Id", "string": "{0F4E...}" } ] }
//!     ]
//!   }
//! }
//! ```
//!
//! A value carries either raw `data` bytes or a `string` stored as UTF-16LE
//! with a terminating NUL; `data` wins when both are present.

use crate::error::RegistryResult;
use crate::hive_type::HiveType;
use crate::key::{join_key_path, reg_types, RegistryKey, RegistryValue};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Keys built without an explicit offset are numbered from here, above any
/// real hive cell offset.
const SYNTHETIC_OFFSET_BASE: u64 = 1 << 32;

#[derive(Debug)]
struct KeyData {
    name: String,
    last_written: u64,
    offset: u64,
    values: Vec<RegistryValue>,
    subkeys: Vec<Arc<KeyData>>,
}

/// A key in an in-memory tree.
#[derive(Debug, Clone)]
pub struct MemoryKey {
    data: Arc<KeyData>,
    path: String,
}

impl RegistryKey for MemoryKey {
    fn name(&self) -> &str {
        &self.data.name
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn offset(&self) -> u64 {
        self.data.offset
    }

    fn last_written_timestamp(&self) -> u64 {
        self.data.last_written
    }

    fn subkey(&self, name: &str) -> Option<Self> {
        self.data
            .subkeys
            .iter()
            .find(|k| k.name.eq_ignore_ascii_case(name))
            .map(|k| self.child(k))
    }

    fn subkeys(&self) -> Vec<Self> {
        self.data.subkeys.iter().map(|k| self.child(k)).collect()
    }

    fn value(&self, name: &str) -> Option<RegistryValue> {
        self.data
            .values
            .iter()
            .find(|v| v.name.eq_ignore_ascii_case(name))
            .cloned()
    }
}

impl MemoryKey {
    fn child(&self, data: &Arc<KeyData>) -> MemoryKey {
        MemoryKey {
            path: join_key_path(&self.path, &data.name),
            data: Arc::clone(data),
        }
    }
}

/// Builder for [`MemoryKey`] trees.
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    name: String,
    last_written: u64,
    offset: Option<u64>,
    values: Vec<RegistryValue>,
    subkeys: Vec<KeyBuilder>,
}

impl KeyBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        KeyBuilder {
            name: name.into(),
            last_written: 0,
            offset: None,
            values: Vec::new(),
            subkeys: Vec::new(),
        }
    }

    pub fn last_written(mut self, filetime: u64) -> Self {
        self.last_written = filetime;
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn value(mut self, value: RegistryValue) -> Self {
        self.values.push(value);
        self
    }

    /// Add a `REG_SZ` value.
    pub fn string_value(self, name: &str, text: &str) -> Self {
        self.value(RegistryValue::string(name, text))
    }

    /// Add a `REG_BINARY` value.
    pub fn binary_value(self, name: &str, data: impl Into<Vec<u8>>) -> Self {
        self.value(RegistryValue::binary(name, data.into()))
    }

    pub fn subkey(mut self, subkey: KeyBuilder) -> Self {
        self.subkeys.push(subkey);
        self
    }

    /// Build a hive root (path `\`).
    pub fn build(self) -> MemoryKey {
        self.build_with_path("\\".to_string())
    }

    /// Build a key that lives under `parent_path`.
    pub fn build_under(self, parent_path: &str) -> MemoryKey {
        let path = join_key_path(parent_path, &self.name);
        self.build_with_path(path)
    }

    fn build_with_path(self, path: String) -> MemoryKey {
        let mut next_offset = SYNTHETIC_OFFSET_BASE;
        MemoryKey {
            data: self.into_data(&mut next_offset),
            path,
        }
    }

    fn into_data(self, next_offset: &mut u64) -> Arc<KeyData> {
        let offset = self.offset.unwrap_or_else(|| {
            let offset = *next_offset;
            *next_offset += 1;
            offset
        });
        let subkeys = self
            .subkeys
            .into_iter()
            .map(|k| k.into_data(next_offset))
            .collect();
        Arc::new(KeyData {
            name: self.name,
            last_written: self.last_written,
            offset,
            values: self.values,
            subkeys,
        })
    }
}

// ── JSON snapshots ───────────────────────────────────────────────────

/// A whole hive serialized as a key tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HiveSnapshot {
    #[serde(default)]
    pub hive_type: Option<HiveType>,
    pub root: KeySnapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeySnapshot {
    pub name: String,
    #[serde(default)]
    pub last_written: u64,
    #[serde(default)]
    pub offset: Option<u64>,
    #[serde(default)]
    pub values: Vec<ValueSnapshot>,
    #[serde(default)]
    pub subkeys: Vec<KeySnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueSnapshot {
    pub name: String,
    #[serde(default)]
    pub value_type: Option<u32>,
    #[serde(default)]
    pub data: Option<Vec<u8>>,
    #[serde(default)]
    pub string: Option<String>,
}

impl From<ValueSnapshot> for RegistryValue {
    fn from(v: ValueSnapshot) -> Self {
        match (v.data, v.string) {
            (Some(data), _) => RegistryValue::new(
                v.name,
                v.value_type.unwrap_or(reg_types::REG_BINARY),
                data,
            ),
            (None, Some(text)) => {
                let mut value = RegistryValue::string(v.name, &text);
                if let Some(t) = v.value_type {
                    value.value_type = t;
                }
                value
            }
            (None, None) => RegistryValue::new(
                v.name,
                v.value_type.unwrap_or(reg_types::REG_NONE),
                Vec::new(),
            ),
        }
    }
}

impl From<KeySnapshot> for KeyBuilder {
    fn from(k: KeySnapshot) -> Self {
        let mut builder = KeyBuilder::new(k.name).last_written(k.last_written);
        if let Some(offset) = k.offset {
            builder = builder.offset(offset);
        }
        builder.values = k.values.into_iter().map(RegistryValue::from).collect();
        builder.subkeys = k.subkeys.into_iter().map(KeyBuilder::from).collect();
        builder
    }
}

impl HiveSnapshot {
    pub fn from_json_str(json: &str) -> RegistryResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> RegistryResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Build the in-memory tree; the snapshot root becomes the hive root `\`.
    pub fn root_key(&self) -> MemoryKey {
        KeyBuilder::from(self.root.clone()).build()
    }
}
