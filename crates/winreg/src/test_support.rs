//! Synthetic regf images for tests.
//!
//! Enabled for this crate's own tests and, through the `test-support`
//! feature, for downstream crates that need a real hive on disk.

use crate::hive::*;
use crate::key::encode_utf16le_nul;

/// Characters of the hive file name kept in the base block, plus NUL.
const FILE_NAME_CHARS: usize = REGF_FILE_NAME_SIZE / 2 - 1;

/// Minimal regf writer: cells are appended to a single growing hbin.
///
/// Every builder method returns the cell offset (relative to hive data) of
/// what it wrote, so keys are assembled bottom-up.
pub struct HiveBuilder {
    bins: Vec<u8>,
}

impl Default for HiveBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HiveBuilder {
    pub fn new() -> Self {
        let mut bins = vec![0u8; 0x20];
        bins[0..4].copy_from_slice(HBIN_SIGNATURE);
        HiveBuilder { bins }
    }

    /// Append an allocated cell, returning its offset in hive data.
    pub fn alloc(&mut self, payload: &[u8]) -> u32 {
        let offset = self.bins.len() as u32;
        let size = (4 + payload.len() + 7) & !7;
        self.bins.extend_from_slice(&(-(size as i32)).to_le_bytes());
        self.bins.extend_from_slice(payload);
        self.bins.resize(offset as usize + size, 0);
        offset
    }

    /// A VK cell. Data of four bytes or less is stored resident.
    pub fn value(&mut self, name: &str, value_type: u32, data: &[u8]) -> u32 {
        let (length, data_offset) = if data.len() <= 4 {
            let mut inline = [0u8; 4];
            inline[..data.len()].copy_from_slice(data);
            (data.len() as u32 | VK_DATA_RESIDENT, u32::from_le_bytes(inline))
        } else {
            (data.len() as u32, self.alloc(data))
        };
        let mut vk = vec![0u8; VK_NAME_START];
        vk[0..2].copy_from_slice(&VK_SIGNATURE.to_le_bytes());
        vk[VK_NAME_LENGTH..VK_NAME_LENGTH + 2].copy_from_slice(&(name.len() as u16).to_le_bytes());
        vk[VK_DATA_LENGTH..VK_DATA_LENGTH + 4].copy_from_slice(&length.to_le_bytes());
        vk[VK_DATA_OFFSET..VK_DATA_OFFSET + 4].copy_from_slice(&data_offset.to_le_bytes());
        vk[VK_TYPE..VK_TYPE + 4].copy_from_slice(&value_type.to_le_bytes());
        vk[VK_FLAGS..VK_FLAGS + 2].copy_from_slice(&VALUE_COMP_NAME.to_le_bytes());
        vk.extend_from_slice(name.as_bytes());
        self.alloc(&vk)
    }

    /// An NK cell with an ASCII name and an `lf` subkey list.
    pub fn key(
        &mut self,
        name: &str,
        flags: u16,
        last_written: u64,
        subkeys: &[u32],
        values: &[u32],
    ) -> u32 {
        let subkey_list = if subkeys.is_empty() {
            NO_CELL
        } else {
            let mut lf = Vec::new();
            lf.extend_from_slice(&LF_SIGNATURE.to_le_bytes());
            lf.extend_from_slice(&(subkeys.len() as u16).to_le_bytes());
            for &off in subkeys {
                lf.extend_from_slice(&off.to_le_bytes());
                lf.extend_from_slice(&0u32.to_le_bytes()); // hash
            }
            self.alloc(&lf)
        };
        let value_list = if values.is_empty() {
            NO_CELL
        } else {
            let list: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
            self.alloc(&list)
        };

        let mut nk = vec![0u8; NK_NAME_START];
        nk[0..2].copy_from_slice(&NK_SIGNATURE.to_le_bytes());
        nk[NK_FLAGS..NK_FLAGS + 2].copy_from_slice(&(flags | KEY_COMP_NAME).to_le_bytes());
        nk[NK_TIMESTAMP..NK_TIMESTAMP + 8].copy_from_slice(&last_written.to_le_bytes());
        nk[NK_SUBKEY_COUNT..NK_SUBKEY_COUNT + 4].copy_from_slice(&(subkeys.len() as u32).to_le_bytes());
        nk[NK_SUBKEY_LIST..NK_SUBKEY_LIST + 4].copy_from_slice(&subkey_list.to_le_bytes());
        nk[NK_VALUE_COUNT..NK_VALUE_COUNT + 4].copy_from_slice(&(values.len() as u32).to_le_bytes());
        nk[NK_VALUE_LIST..NK_VALUE_LIST + 4].copy_from_slice(&value_list.to_le_bytes());
        nk[NK_NAME_LENGTH..NK_NAME_LENGTH + 2].copy_from_slice(&(name.len() as u16).to_le_bytes());
        nk.extend_from_slice(name.as_bytes());
        self.alloc(&nk)
    }

    /// The hive root: an NK cell flagged as the hive entry.
    pub fn root(&mut self, name: &str, subkeys: &[u32], values: &[u32]) -> u32 {
        self.key(name, KEY_HIVE_ENTRY, 0, subkeys, values)
    }

    /// Prepend the base block and pad the hbin to a 4 KiB boundary.
    ///
    /// Like Windows, only the last 31 characters of `file_name` are kept.
    pub fn finish(mut self, root: u32, file_name: &str) -> Vec<u8> {
        let hive_length = (self.bins.len() + 0xFFF) & !0xFFF;
        self.bins.resize(hive_length, 0);
        self.bins[8..12].copy_from_slice(&(hive_length as u32).to_le_bytes());

        let mut file = vec![0u8; HBASE_BLOCK_SIZE];
        file[0..4].copy_from_slice(REGF_SIGNATURE);
        file[REGF_SEQUENCE_PRIMARY..REGF_SEQUENCE_PRIMARY + 4].copy_from_slice(&1u32.to_le_bytes());
        file[REGF_SEQUENCE_SECONDARY..REGF_SEQUENCE_SECONDARY + 4].copy_from_slice(&1u32.to_le_bytes());
        file[REGF_MAJOR_VERSION..REGF_MAJOR_VERSION + 4].copy_from_slice(&1u32.to_le_bytes());
        file[REGF_MINOR_VERSION..REGF_MINOR_VERSION + 4].copy_from_slice(&5u32.to_le_bytes());
        file[REGF_ROOT_CELL_OFFSET..REGF_ROOT_CELL_OFFSET + 4].copy_from_slice(&root.to_le_bytes());
        file[REGF_HIVE_LENGTH..REGF_HIVE_LENGTH + 4].copy_from_slice(&(hive_length as u32).to_le_bytes());

        let chars: Vec<char> = file_name.chars().collect();
        let tail: String = chars[chars.len().saturating_sub(FILE_NAME_CHARS)..].iter().collect();
        let name = encode_utf16le_nul(&tail);
        let n = name.len().min(REGF_FILE_NAME_SIZE);
        file[REGF_FILE_NAME..REGF_FILE_NAME + n].copy_from_slice(&name[..n]);

        file.extend_from_slice(&self.bins);
        file
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HiveFile;

    #[test]
    fn test_long_file_name_keeps_tail() {
        let mut h = HiveBuilder::new();
        let root = h.root("ROOT", &[], &[]);
        let bytes = h.finish(root, "\\REGISTRY\\MACHINE\\SYSTEM32\\Config\\SOFTWARE");
        let hive = HiveFile::from_bytes(bytes).unwrap();
        assert_eq!(hive.base_block().file_name.chars().count(), FILE_NAME_CHARS);
        assert!(hive.base_block().file_name.ends_with("\\Config\\SOFTWARE"));
    }

    #[test]
    fn test_short_file_name_kept_whole() {
        let mut h = HiveBuilder::new();
        let root = h.root("ROOT", &[], &[]);
        let hive = HiveFile::from_bytes(h.finish(root, "SYSTEM")).unwrap();
        assert_eq!(hive.base_block().file_name, "SYSTEM");
    }
}
