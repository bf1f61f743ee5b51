//! Error types for the registry store.

use thiserror::Error;

/// Registry hive reading errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid base block signature: {0:02x?}")]
    InvalidSignature([u8; 4]),

    #[error("hive is too small: {size} bytes (need at least {needed})")]
    Truncated { size: usize, needed: usize },

    #[error("invalid base block: {0}")]
    InvalidBaseBlock(String),

    #[error("cell read {offset:#x}+{length} exceeds hive data ({available:#x} bytes)")]
    CellOutOfBounds {
        offset: u32,
        length: usize,
        available: usize,
    },

    #[error("expected {expected} cell at {offset:#x}, got signature {found:#06x}")]
    UnexpectedCell {
        offset: u32,
        expected: &'static str,
        found: u16,
    },

    #[error("{kind} count {count} at {offset:#x} is unreasonably large")]
    ListTooLarge {
        kind: &'static str,
        offset: u32,
        count: usize,
    },

    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("snapshot parse error: {0}")]
    Snapshot(#[from] serde_json::Error),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_out_of_bounds_message() {
        let err = RegistryError::CellOutOfBounds {
            offset: 0x20,
            length: 80,
            available: 0x1000,
        };
        let msg = err.to_string();
        assert!(msg.contains("0x20"));
        assert!(msg.contains("0x1000"));
    }

    #[test]
    fn test_unexpected_cell_message() {
        let err = RegistryError::UnexpectedCell {
            offset: 0x80,
            expected: "nk",
            found: 0x6b76,
        };
        assert!(err.to_string().contains("nk cell at 0x80"));
        assert!(err.to_string().contains("0x6b76"));
    }
}
