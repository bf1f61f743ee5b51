//! Task name resolution from the `Tree` key.
//!
//! `Tree` mirrors the Task Scheduler folder hierarchy. Any key in it may carry
//! an `Id` value holding the identifier of the task it names, stored as
//! `{XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX}` in UTF-16LE with a NUL terminator
//! (78 bytes). The same identifier names the task's key under `Tasks`.

use crate::error::{TaskCacheError, TaskCacheResult};
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::warn;
use winreg::key::{encode_utf16le_nul, read_utf16le_string};
use winreg::{RegistryKey, RegistryValue};

pub const ID_VALUE_NAME: &str = "Id";

/// Size of an `Id` value: 38 UTF-16 code units plus NUL.
pub const TASK_ID_SIZE: usize = 78;

pub const DEFAULT_MAX_TREE_DEPTH: usize = 256;

/// Raw task identifier bytes, exactly as stored in an `Id` value.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId([u8; TASK_ID_SIZE]);

impl TaskId {
    /// Accept `Id` value data; anything but 78 bytes is unsupported.
    pub fn from_value_data(data: &[u8]) -> TaskCacheResult<Self> {
        let bytes: [u8; TASK_ID_SIZE] = data
            .try_into()
            .map_err(|_| TaskCacheError::UnsupportedIdSize { size: data.len() })?;
        Ok(TaskId(bytes))
    }

    /// Encode a `Tasks` subkey name the way `Id` values store it.
    ///
    /// Returns `None` when the name cannot be a stored identifier.
    pub fn from_key_name(name: &str) -> Option<Self> {
        TaskId::from_value_data(&encode_utf16le_nul(name)).ok()
    }

    pub fn as_bytes(&self) -> &[u8; TASK_ID_SIZE] {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&read_utf16le_string(&self.0))
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({})", self)
    }
}

/// Depth-first, pre-order walk yielding every key that has an `Id` value.
///
/// Uses an explicit stack. Keys deeper than `max_depth` below the start key
/// are not descended into, and a key offset seen twice is skipped, so a
/// corrupt hive with cyclic subkey lists still terminates.
pub struct IdValues<K> {
    stack: Vec<(K, usize)>,
    visited: HashSet<u64>,
    revisited: usize,
    max_depth: usize,
}

/// Walk `root` and everything beneath it.
pub fn id_values<K: RegistryKey>(root: K, max_depth: usize) -> IdValues<K> {
    IdValues {
        stack: vec![(root, 0)],
        visited: HashSet::new(),
        revisited: 0,
        max_depth,
    }
}

impl<K> IdValues<K> {
    /// Keys skipped so far because their offset was already visited.
    pub fn revisited(&self) -> usize {
        self.revisited
    }
}

impl<K: RegistryKey> Iterator for IdValues<K> {
    type Item = (K, RegistryValue);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((key, depth)) = self.stack.pop() {
            if !self.visited.insert(key.offset()) {
                // Either a cyclic subkey list or a store that reuses offsets;
                // any Id under this key is lost.
                warn!(
                    "task_cache: skipping {}, offset {:#x} already visited",
                    key.path(),
                    key.offset()
                );
                self.revisited += 1;
                continue;
            }

            let children = key.subkeys();
            if depth < self.max_depth {
                // Reversed so the first child is popped first.
                self.stack
                    .extend(children.into_iter().rev().map(|child| (child, depth + 1)));
            } else if !children.is_empty() {
                warn!(
                    "task_cache: Tree depth limit {} reached at {}, {} subkeys not visited",
                    self.max_depth,
                    key.path(),
                    children.len()
                );
            }

            if let Some(value) = key.value(ID_VALUE_NAME) {
                return Some((key, value));
            }
        }
        None
    }
}

/// Task identifier to the name of the `Tree` key that declared it.
#[derive(Debug, Clone, Default)]
pub struct IdentifierMap {
    names: HashMap<TaskId, String>,
}

impl IdentifierMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a declaration; a later declaration of the same identifier wins.
    pub fn insert(&mut self, id: TaskId, name: impl Into<String>) -> Option<String> {
        self.names.insert(id, name.into())
    }

    pub fn get(&self, id: &TaskId) -> Option<&str> {
        self.names.get(id).map(String::as_str)
    }

    /// Resolve a `Tasks` subkey name.
    pub fn resolve(&self, identifier: &str) -> Option<&str> {
        TaskId::from_key_name(identifier).and_then(|id| self.get(&id))
    }

    /// The declared task name, or the identifier itself when unresolved.
    pub fn name_or_identifier<'a>(&'a self, identifier: &'a str) -> &'a str {
        match self.resolve(identifier) {
            Some(name) => name,
            None => identifier,
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
