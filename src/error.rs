//! Structured error type shared by the builder and the reader.

use thiserror::Error;

/// Everything that can go wrong building or reading a hardhat database.
#[derive(Debug, Error)]
pub enum HardhatError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("operation attempted on a finished or failed builder")]
    InvalidState,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("out of memory: {0}")]
    OutOfMemory(String),

    #[error("protocol error: {0}")]
    Protocol(&'static str),
}

impl HardhatError {
    /// Sticky failures (I/O, allocation) leave the builder permanently
    /// unusable; plain argument rejections do not.
    pub fn is_fatal(&self) -> bool {
        matches!(self, HardhatError::Io(_) | HardhatError::OutOfMemory(_))
    }
}

pub type Result<T> = std::result::Result<T, HardhatError>;
