//! Error taxonomy for the engine (spec §6.3).
//!
//! Every public operation returns [`Result<T>`]; there is no panic-based
//! error channel in non-test code.

use std::io;

use thiserror::Error;

/// The full set of error kinds the engine can return.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid magic number in database header")]
    InvalidMagicNumber,

    #[error("unsupported database format version: {0}")]
    UnsupportedVersion(u32),

    #[error("invalid page size: {0}")]
    InvalidPageSize(u32),

    #[error("io error: {0}")]
    IoError(#[from] io::Error),

    #[error("corrupt database: {0}")]
    CorruptDatabase(String),

    #[error("key not found")]
    KeyNotFound,

    #[error("key too large: {len} bytes (max {max})")]
    KeyTooLarge { len: usize, max: usize },

    #[error("value too large: {len} bytes (max {max})")]
    ValueTooLarge { len: usize, max: usize },

    #[error("transaction conflict")]
    TransactionConflict,

    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("no evictable page available in buffer pool")]
    NoEvictablePage,

    #[error("out of memory")]
    OutOfMemory,

    #[error("database is closed or in a fatal error state")]
    InvalidState,
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
