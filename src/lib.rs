//! Cell Cloud – a nucleus runtime for pluggable service units
//!
//! This crate implements the Cell Cloud talk layer with:
//! - Primitives made of typed stuffs, serialized with an escaped bracket/brace grammar
//! - Pluggable dialects layered on primitives, resolved through a registry
//! - A bounded worker pool dispatching action dialect invocations
//! - A chunk dialect cache reassembling large payloads under a memory ceiling
//! - A nucleus that routes primitives between cellets and a transport

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Primitive, serializer and dialect protocol stack
pub mod talk;

/// Nucleus orchestrator and the cellet boundary
pub mod nucleus;

/// File transfer built on chunk dialects
pub mod transfer;

// Re-export key types for convenience
pub use nucleus::{Nucleus, NucleusConfig};
pub use talk::{Primitive, Stuff};

/// Current version of the Cell Cloud crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Primitive wire format version written in every serialized primitive
pub const PROTOCOL_VERSION: &str = "1.0";
