//! Error types for the talk layer
//!
//! Decode problems are only surfaced as errors in strict parse mode; the
//! lenient path logs them and keeps whatever parsed cleanly.

use std::io;
use thiserror::Error;

/// Primitive encode/decode errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Underlying stream failure
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON document could not be read or written
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Stream ended while the parser was inside a structure
    #[error("Unexpected end of stream in {state} state")]
    UnexpectedEof {
        /// Parser state name at end of stream
        state: &'static str,
    },

    /// Stuff type tag is not one of `sub pre obj att adv com`
    #[error("Unknown stuff type '{0}'")]
    UnknownStuffType(String),

    /// Literal tag is not a known literal base
    #[error("Unknown literal '{0}'")]
    UnknownLiteral(String),

    /// Value does not match its declared literal base
    #[error("Value '{value}' is not a valid {literal} literal")]
    InvalidValue {
        /// Declared literal tag
        literal: String,
        /// Offending value
        value: String,
    },

    /// Feature not available on this path (e.g. XML in JSON documents)
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

/// Convenience result alias for talk operations
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;
