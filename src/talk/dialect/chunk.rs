//! Chunk dialect: one fragment of a larger payload
//!
//! Wire layout: subjects `sign`, `chunk_index`, `chunk_num`; objectives
//! base64 data, valid length, total payload length.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::any::Any;

use super::chunk_factory::ChunkDialectFactory;
use super::{Dialect, DialectMeta};
use crate::talk::primitive::Primitive;
use crate::talk::stuff::Stuff;

/// A bounded-size fragment addressed by (owner tag, sign, index)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkDialect {
    meta: DialectMeta,
    sign: String,
    chunk_index: u32,
    chunk_num: u32,
    data: Vec<u8>,
    length: usize,
    total_length: u64,
}

impl ChunkDialect {
    /// Dialect name
    pub const NAME: &'static str = "ChunkDialect";

    /// Default fragment size in bytes
    pub const DEFAULT_LENGTH: usize = 6144;

    /// Create an empty chunk dialect, as a factory does before `build`
    pub fn with_tracker(tracker: impl Into<String>) -> Self {
        Self {
            meta: DialectMeta::new(tracker),
            ..Self::default()
        }
    }

    /// Create a fragment of `sign`
    pub fn new(
        sign: impl Into<String>,
        total_length: u64,
        chunk_index: u32,
        chunk_num: u32,
        data: Vec<u8>,
    ) -> Self {
        let length = data.len();
        Self {
            meta: DialectMeta::default(),
            sign: sign.into(),
            chunk_index,
            chunk_num,
            data,
            length,
            total_length,
        }
    }

    /// Reassembly key
    pub fn sign(&self) -> &str {
        &self.sign
    }

    /// Zero-based fragment index
    pub fn chunk_index(&self) -> u32 {
        self.chunk_index
    }

    /// Total fragment count for this sign
    pub fn chunk_num(&self) -> u32 {
        self.chunk_num
    }

    /// Valid bytes of this fragment
    pub fn data(&self) -> &[u8] {
        &self.data[..self.length]
    }

    /// Valid byte count
    pub fn length(&self) -> usize {
        self.length
    }

    /// Length of the whole payload
    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    /// Whether this is the final fragment
    pub fn is_last(&self) -> bool {
        self.chunk_num > 0 && self.chunk_index == self.chunk_num - 1
    }

    /// Bytes received so far assuming in-order `chunk_size` fragments
    pub fn progress(&self, chunk_size: usize) -> u64 {
        let processed = (u64::from(self.chunk_index) + 1).saturating_mul(chunk_size as u64);
        processed.min(self.total_length)
    }

    /// Whether every fragment of this sign has reached `factory`
    pub fn has_completed(&self, factory: &ChunkDialectFactory) -> bool {
        self.meta
            .owner_tag()
            .is_some_and(|tag| factory.check_completed(tag, &self.sign))
    }

    /// Copy fragment `index` of this sign out of `factory`
    pub fn read(&self, factory: &ChunkDialectFactory, index: usize, out: &mut [u8]) -> Option<usize> {
        let tag = self.meta.owner_tag()?;
        factory.read(tag, &self.sign, index, out)
    }

    /// Release this sign's fragments from `factory`
    pub fn clear(&self, factory: &ChunkDialectFactory) -> u64 {
        self.meta
            .owner_tag()
            .map_or(0, |tag| factory.clear(tag, &self.sign))
    }
}

impl Dialect for ChunkDialect {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn meta(&self) -> &DialectMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut DialectMeta {
        &mut self.meta
    }

    fn translate(&self) -> Option<Primitive> {
        if self.sign.is_empty() {
            tracing::warn!("chunk dialect has no sign");
            return None;
        }

        let mut primitive = Primitive::new();
        primitive.commit(Stuff::subject(self.sign.as_str()));
        primitive.commit(Stuff::subject(self.chunk_index));
        primitive.commit(Stuff::subject(self.chunk_num));
        primitive.commit(Stuff::objective(BASE64.encode(self.data())));
        primitive.commit(Stuff::objective(self.length as u64));
        primitive.commit(Stuff::objective(self.total_length));
        Some(primitive)
    }

    fn build(&mut self, primitive: &Primitive) {
        let subjects = primitive.subjects();
        let objectives = primitive.objectives();
        if subjects.len() < 3 || objectives.len() < 3 {
            tracing::warn!(
                subjects = subjects.len(),
                objectives = objectives.len(),
                "chunk dialect primitive is incomplete"
            );
        }

        if let Some(sign) = subjects.first() {
            self.sign = sign.value().to_string();
        }
        self.chunk_index = subjects.get(1).and_then(Stuff::as_uint).unwrap_or(0);
        self.chunk_num = subjects.get(2).and_then(Stuff::as_uint).unwrap_or(0);

        self.data = match objectives.first().map(|s| BASE64.decode(s.value())) {
            Some(Ok(data)) => data,
            Some(Err(err)) => {
                tracing::warn!(sign = %self.sign, error = %err, "chunk data is not valid base64");
                Vec::new()
            }
            None => Vec::new(),
        };

        let declared = objectives
            .get(1)
            .and_then(Stuff::as_ulong)
            .map_or(self.data.len(), |len| len as usize);
        self.length = declared.min(self.data.len());
        self.total_length = objectives.get(2).and_then(Stuff::as_ulong).unwrap_or(0);
    }

    fn clone_dialect(&self) -> Box<dyn Dialect> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
