#![forbid(unsafe_code)]

use thiserror::Error;

/// Result type used by `pcache-backend`.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors produced by storage engines.
///
/// Higher layers wrap this to add the cache id.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("backend params are not valid")]
    InvalidParams,

    #[error("backend was opened read-only")]
    ReadOnly,

    #[error("record of {len} bytes exceeds the frame limit")]
    TooLarge { len: usize },

    #[error("corrupt record at offset {offset}")]
    Corrupt { offset: u64 },
}
