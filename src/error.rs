//! Error types for AtlasRep
//!
//! Provides a unified error type for all operations.
//!
//! Errors fall into three groups:
//! - OS/storage failures, reported with the failing operation and path
//! - protocol invariant violations (short transfers, size mismatches,
//!   missing covering segment, oversized bootstrap header)
//! - configuration errors (bad options, malformed file names)
//!
//! None of them are retried. Daemons return them to their owner, which
//! logs a diagnostic and tears the connection or process down.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using RepError
pub type Result<T> = std::result::Result<T, RepError>;

/// Unified error type for AtlasRep operations
#[derive(Debug, Error)]
pub enum RepError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{op} failed on {}: {source}", path.display())]
    Os {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // -------------------------------------------------------------------------
    // Log Errors
    // -------------------------------------------------------------------------
    #[error("Log corruption detected: {0}")]
    LogCorruption(String),

    #[error("No segment covers log offset 0x{0:x}")]
    MissingSegment(u64),

    // -------------------------------------------------------------------------
    // Replication Protocol Errors
    // -------------------------------------------------------------------------
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Short transfer: expected {expected} bytes, got {actual}")]
    ShortTransfer { expected: u64, actual: u64 },

    #[error("Bootstrap header of {size} bytes does not fit transport buffer of {capacity} bytes")]
    HeaderTooLarge { size: usize, capacity: usize },

    #[error("Write attempted before peer signaled ReadyToReceive")]
    NotReady,

    #[error("Peer disconnected")]
    Disconnected,

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Network Errors
    // -------------------------------------------------------------------------
    #[error("Network error: {0}")]
    Network(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RepError {
    /// Wrap an OS error with the operation and file it failed on
    pub fn os(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RepError::Os {
            op,
            path: path.into(),
            source,
        }
    }
}

impl From<bincode::Error> for RepError {
    fn from(e: bincode::Error) -> Self {
        RepError::Serialization(e.to_string())
    }
}
