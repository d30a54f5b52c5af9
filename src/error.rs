use std::io;
use std::time::SystemTimeError;
use thiserror::Error;

/// Error taxonomy for the store, surfaced from both the write path and the
/// background workers.
#[derive(Error, Debug)]
pub enum StoreError {
    /// An underlying filesystem call failed.
    #[error("I/O error: {0}")]
    IoFailure(#[from] io::Error),

    /// A single record's framing (header or length) is invalid.
    #[error("corrupt record: {0}")]
    CorruptRecord(String),

    /// A whole file is unreadable; fatal for the query but not the process.
    #[error("corrupt store: {0}")]
    CorruptStore(String),

    /// Empty key, length exceeds codec bounds, or unknown config.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A background lock was poisoned by a panicking thread.
    #[error("lock poisoned: {0}")]
    LockPoisoned(&'static str),

    #[error("system time error: {0}")]
    Time(#[from] SystemTimeError),
}

pub type Result<T> = std::result::Result<T, StoreError>;
