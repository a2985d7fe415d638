//! Outbound transport boundary

use parking_lot::Mutex;
use std::io;

/// Sends serialized primitives to a peer
pub trait Transport: Send + Sync {
    /// Hand `payload` to the connection identified by `peer_tag`
    fn transmit(&self, peer_tag: &str, payload: Vec<u8>) -> io::Result<()>;
}

/// One transmitted payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Destination peer
    pub peer_tag: String,
    /// Serialized primitive
    pub payload: Vec<u8>,
}

/// Transport that records frames in memory
#[derive(Debug, Default)]
pub struct MemoryTransport {
    frames: Mutex<Vec<Frame>>,
}

impl MemoryTransport {
    /// Create an empty transport
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return every recorded frame, oldest first
    pub fn drain(&self) -> Vec<Frame> {
        std::mem::take(&mut *self.frames.lock())
    }

    /// Recorded frame count
    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    /// Whether no frame is recorded
    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }
}

impl Transport for MemoryTransport {
    fn transmit(&self, peer_tag: &str, payload: Vec<u8>) -> io::Result<()> {
        tracing::trace!(peer = %peer_tag, bytes = payload.len(), "memory transport frame");
        self.frames.lock().push(Frame {
            peer_tag: peer_tag.to_string(),
            payload,
        });
        Ok(())
    }
}
