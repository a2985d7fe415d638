//! Cellet: the pluggable service unit hosted by a nucleus

use crate::talk::Primitive;

/// Service unit receiving primitives from peers
///
/// Implementations must be thread safe: the transport may deliver from
/// several threads at once.
pub trait Cellet: Send + Sync {
    /// Unique identifier within a nucleus
    fn identifier(&self) -> &str;

    /// A primitive arrived from `peer_tag`
    fn dialogue(&self, peer_tag: &str, primitive: Primitive);

    /// A peer connected
    fn contacted(&self, _peer_tag: &str) {}

    /// A peer disconnected
    fn quitted(&self, _peer_tag: &str) {}
}
