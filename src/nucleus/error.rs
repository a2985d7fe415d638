//! Error types for the nucleus
//!
//! Domain errors use thiserror; the config file boundary and the CLI use
//! anyhow on top of these.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::talk::ProtocolError;

/// Top-level nucleus error
#[derive(Debug, Error)]
pub enum NucleusError {
    /// Primitive encode/decode errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// File transfer errors
    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// Persistence errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// No cellet registered under the identifier
    #[error("Cellet '{0}' not found")]
    CelletNotFound(String),

    /// A cellet with this identifier is already registered
    #[error("Cellet '{0}' already registered")]
    DuplicateCellet(String),

    /// A dialect factory refused the talk
    #[error("Talk vetoed by {dialect}")]
    Vetoed {
        /// Dialect whose factory vetoed
        dialect: String,
    },

    /// Transport failed to send
    #[error("Transport error: {0}")]
    Transport(#[source] io::Error),

    /// Dialect could not produce a primitive
    #[error("Dialect {0} could not be translated")]
    Untranslatable(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

/// File transfer errors
#[derive(Debug, Error)]
pub enum TransferError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Not every fragment has arrived
    #[error("Transfer '{sign}' incomplete: {received} of {expected} fragments")]
    Incomplete {
        /// Transfer sign
        sign: String,
        /// Fragments present
        received: usize,
        /// Fragments declared
        expected: usize,
    },

    /// A fragment vanished between the completion check and the read
    #[error("Transfer '{sign}' is missing fragment {index}")]
    MissingFragment {
        /// Transfer sign
        sign: String,
        /// Fragment index
        index: usize,
    },

    /// Sign does not name a file
    #[error("Invalid transfer sign: {0}")]
    InvalidSign(String),

    /// File needs more fragments than a `u32` index can address
    #[error("{length} bytes need too many fragments of {chunk_size} bytes")]
    TooManyFragments {
        /// File length
        length: u64,
        /// Fragment size
        chunk_size: usize,
    },
}

/// Convenience result alias for transfer operations
pub type TransferResult<T> = std::result::Result<T, TransferError>;

/// Storage-specific errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Atomic write failed
    #[error("Atomic write failed for {path}: {detail}")]
    AtomicWriteFailed {
        /// Path where write failed
        path: PathBuf,
        /// Error details
        detail: String,
    },
}

/// Convenience result alias for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Result type using NucleusError
pub type Result<T> = std::result::Result<T, NucleusError>;
