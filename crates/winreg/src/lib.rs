//! Read-only access to Windows registry hives.
//!
//! This crate provides:
//!
//! - The [`RegistryKey`] trait: the store-independent view plugins consume
//! - [`HiveFile`]: a memory-mapped regf file reader (NK/VK cells, lf/lh/li/ri lists)
//! - [`MemoryKey`]: in-memory key trees, built in code or loaded from JSON snapshots
//! - [`HiveType`]: hive classification from the embedded or on-disk file name
//!
//! # Example
//!
//! ```rust,ignore
//! use winreg::{HiveFile, RegistryKey};
//!
//! let hive = HiveFile::open("SOFTWARE")?;
//! let key = hive.open_key("Microsoft\\Windows NT\\CurrentVersion")?;
//! for subkey in key.subkeys() {
//!     println!("{}", subkey.path());
//! }
//! ```

pub mod error;
pub mod hive;
pub mod hive_type;
pub mod key;
pub mod memory;
#[cfg(any(test, feature = "test-support"))]
#[doc(hidden)]
pub mod test_support;

// Re-export key types at crate root.
pub use error::{RegistryError, RegistryResult};
pub use hive::{BaseBlock, HiveFile, HiveKey, HiveReader, KeyNode};
pub use hive_type::HiveType;
pub use key::{reg_types, RegistryKey, RegistryValue};
pub use memory::{HiveSnapshot, KeyBuilder, KeySnapshot, MemoryKey, ValueSnapshot};
