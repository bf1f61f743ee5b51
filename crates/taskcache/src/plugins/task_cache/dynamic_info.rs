//! `DynamicInfo` value decoding.
//!
//! Layout (28 bytes, little-endian):
//! ```text
//! +0x00  version               u32
//! +0x04  last_registered_time  u64  FILETIME
//! +0x0C  launch_time           u64  FILETIME
//! +0x14  reserved              8 bytes
//! ```
//! Only this layout is known. `version` is informational and never changes
//! how the rest is read.

use crate::error::{TaskCacheError, TaskCacheResult};

pub const DYNAMIC_INFO_VALUE_NAME: &str = "DynamicInfo";

pub const DYNAMIC_INFO_SIZE: usize = 28;

const VERSION: usize = 0;
const LAST_REGISTERED_TIME: usize = 4;
const LAUNCH_TIME: usize = 12;
const RESERVED: usize = 20;

/// A decoded `DynamicInfo` record. Zero timestamps mean "not recorded".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DynamicInfo {
    pub version: u32,
    pub last_registered_time: u64,
    pub launch_time: u64,
    pub reserved: [u8; 8],
}

impl DynamicInfo {
    /// Decode a record. Any length other than 28 bytes is rejected whole.
    pub fn parse(data: &[u8]) -> TaskCacheResult<Self> {
        let raw: &[u8; DYNAMIC_INFO_SIZE] =
            data.try_into().map_err(|_| TaskCacheError::MalformedRecord {
                expected: DYNAMIC_INFO_SIZE,
                actual: data.len(),
            })?;

        let mut version = [0u8; 4];
        version.copy_from_slice(&raw[VERSION..LAST_REGISTERED_TIME]);
        let mut last_registered_time = [0u8; 8];
        last_registered_time.copy_from_slice(&raw[LAST_REGISTERED_TIME..LAUNCH_TIME]);
        let mut launch_time = [0u8; 8];
        launch_time.copy_from_slice(&raw[LAUNCH_TIME..RESERVED]);
        let mut reserved = [0u8; 8];
        reserved.copy_from_slice(&raw[RESERVED..DYNAMIC_INFO_SIZE]);

        Ok(DynamicInfo {
            version: u32::from_le_bytes(version),
            last_registered_time: u64::from_le_bytes(last_registered_time),
            launch_time: u64::from_le_bytes(launch_time),
            reserved,
        })
    }

    /// Encode back to the on-disk layout.
    pub fn to_bytes(&self) -> [u8; DYNAMIC_INFO_SIZE] {
        let mut out = [0u8; DYNAMIC_INFO_SIZE];
        out[VERSION..LAST_REGISTERED_TIME].copy_from_slice(&self.version.to_le_bytes());
        out[LAST_REGISTERED_TIME..LAUNCH_TIME]
            .copy_from_slice(&self.last_registered_time.to_le_bytes());
        out[LAUNCH_TIME..RESERVED].copy_from_slice(&self.launch_time.to_le_bytes());
        out[RESERVED..].copy_from_slice(&self.reserved);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fixed_offsets() {
        let mut data = [0u8; DYNAMIC_INFO_SIZE];
        data[0..4].copy_from_slice(&3u32.to_le_bytes());
        data[4..12].copy_from_slice(&0x01D9_1234_5678_9ABCu64.to_le_bytes());
        data[12..20].copy_from_slice(&0x01DA_0000_0000_0001u64.to_le_bytes());
        data[20..28].copy_from_slice(&[0xAA; 8]);

        let info = DynamicInfo::parse(&data).unwrap();
        assert_eq!(info.version, 3);
        assert_eq!(info.last_registered_time, 0x01D9_1234_5678_9ABC);
        assert_eq!(info.launch_time, 0x01DA_0000_0000_0001);
        assert_eq!(info.reserved, [0xAA; 8]);
    }

    #[test]
    fn test_wrong_sizes_rejected() {
        for len in [0usize, 20, 27, 29, 30, 36] {
            let data = vec![0u8; len];
            assert_eq!(
                DynamicInfo::parse(&data),
                Err(TaskCacheError::MalformedRecord {
                    expected: DYNAMIC_INFO_SIZE,
                    actual: len
                })
            );
        }
    }

    #[test]
    fn test_unknown_version_still_decodes() {
        let info = DynamicInfo {
            version: 0xFFFF_FFFF,
            last_registered_time: 100,
            launch_time: 0,
            reserved: [0; 8],
        };
        assert_eq!(DynamicInfo::parse(&info.to_bytes()), Ok(info));
    }

    #[test]
    fn test_decode_is_deterministic() {
        let data: Vec<u8> = (0..DYNAMIC_INFO_SIZE as u8).collect();
        assert_eq!(DynamicInfo::parse(&data), DynamicInfo::parse(&data));
        assert_eq!(DynamicInfo::parse(&data).unwrap().to_bytes().to_vec(), data);
    }
}
