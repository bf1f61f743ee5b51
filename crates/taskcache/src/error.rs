//! Task Cache error and diagnostic types.

use thiserror::Error;

/// Conditions raised while correlating a Task Cache key.
///
/// Only [`TaskCacheError::MalformedRecord`] is ever returned as an `Err`
/// (by the DynamicInfo decoder). The others are reported through
/// [`crate::context::ParserContext::report`] and processing carries on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskCacheError {
    #[error("Task Cache is missing a Tasks or Tree sub key")]
    MissingContainer,

    #[error("unsupported Id value data size: {size} bytes")]
    UnsupportedIdSize { size: usize },

    #[error("unsupported DynamicInfo value data size: {size} bytes")]
    UnsupportedRecordSize { size: usize },

    #[error("malformed DynamicInfo record: expected {expected} bytes, got {actual}")]
    MalformedRecord { expected: usize, actual: usize },
}

pub type TaskCacheResult<T> = Result<T, TaskCacheError>;
