//! Error hierarchy for the versioned store.
//!
//! Categorised by operational concern: lifecycle sentinels, event-bus
//! failures, and filesystem failures. Compare-and-swap misses and key absence
//! are not errors; operations report them through their return values.

use std::path::PathBuf;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The storage has been closed; no further operations are accepted.
    #[error("storage is closed")]
    StorageClosed,

    /// The caller's cancellation token fired while waiting for a value.
    #[error("wait for value cancelled")]
    Cancelled,

    /// Configuration validation failures.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Event bus failures other than closure.
    #[error(transparent)]
    EventBus(#[from] EventBusError),

    /// Filesystem failures.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Disk I/O failures during version or value file operations
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// I/O failure carrying the path it occurred at
    #[error("error occurred at path: {}", .path.display())]
    Path {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    /// The event bus has been closed.
    #[error("event bus is closed")]
    Closed,

    /// The underlying filesystem watch source failed.
    #[error(transparent)]
    Watch(#[from] notify::Error),
}
