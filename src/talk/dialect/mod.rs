//! Dialects: typed sub-protocols layered on primitives
//!
//! A dialect knows how to translate itself into a [`Primitive`] and how to
//! rebuild itself from one. The built-in dialects are closed variants of
//! [`AnyDialect`]; anything else plugs in through [`AnyDialect::Custom`] and
//! a [`DialectFactory`] registered with the [`DialectEnumerator`].

use std::any::Any;
use std::fmt;

use super::primitive::Primitive;

pub mod action;
pub mod action_factory;
pub mod chunk;
pub mod chunk_factory;
pub mod enumerator;

pub use action::ActionDialect;
pub use action_factory::{ActionDelegate, ActionDialectFactory};
pub use chunk::ChunkDialect;
pub use chunk_factory::{ChunkDialectFactory, ReadOrder};
pub use enumerator::DialectEnumerator;

/// Tracker used when none is supplied
pub const DEFAULT_TRACKER: &str = "none";

/// Bookkeeping shared by every dialect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialectMeta {
    tracker: String,
    owner_tag: Option<String>,
    cellet_identifier: Option<String>,
}

impl DialectMeta {
    /// Create metadata with the given tracker
    pub fn new(tracker: impl Into<String>) -> Self {
        Self {
            tracker: tracker.into(),
            owner_tag: None,
            cellet_identifier: None,
        }
    }

    /// Correlation id
    pub fn tracker(&self) -> &str {
        &self.tracker
    }

    /// Replace the correlation id
    pub fn set_tracker(&mut self, tracker: impl Into<String>) {
        self.tracker = tracker.into();
    }

    /// Peer tag of origin or destination
    pub fn owner_tag(&self) -> Option<&str> {
        self.owner_tag.as_deref()
    }

    /// Set the peer tag
    pub fn set_owner_tag(&mut self, tag: impl Into<String>) {
        self.owner_tag = Some(tag.into());
    }

    /// Identifier of the cellet this dialect is bound to
    pub fn cellet_identifier(&self) -> Option<&str> {
        self.cellet_identifier.as_deref()
    }

    /// Bind to a cellet
    pub fn set_cellet_identifier(&mut self, identifier: impl Into<String>) {
        self.cellet_identifier = Some(identifier.into());
    }
}

impl Default for DialectMeta {
    fn default() -> Self {
        Self::new(DEFAULT_TRACKER)
    }
}

/// A pluggable sub-protocol
pub trait Dialect: Send + Sync + fmt::Debug {
    /// Dialect name, constant per type
    fn name(&self) -> &str;

    /// Shared metadata
    fn meta(&self) -> &DialectMeta;

    /// Mutable shared metadata
    fn meta_mut(&mut self) -> &mut DialectMeta;

    /// Produce the stuffs representing this dialect
    ///
    /// Returns `None` when the dialect is not in a sendable state.
    fn translate(&self) -> Option<Primitive>;

    /// Populate this dialect from a primitive's stuffs
    fn build(&mut self, primitive: &Primitive);

    /// Boxed copy, needed to clone custom dialects
    fn clone_dialect(&self) -> Box<dyn Dialect>;

    /// Downcasting support for custom dialects
    fn as_any(&self) -> &dyn Any;
}

/// Every dialect the runtime can carry
#[derive(Debug)]
pub enum AnyDialect {
    /// Remote action invocation
    Action(ActionDialect),
    /// One fragment of a larger payload
    Chunk(ChunkDialect),
    /// Dialect registered by an application
    Custom(Box<dyn Dialect>),
}

impl AnyDialect {
    fn inner(&self) -> &dyn Dialect {
        match self {
            AnyDialect::Action(dialect) => dialect,
            AnyDialect::Chunk(dialect) => dialect,
            AnyDialect::Custom(dialect) => dialect.as_ref(),
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Dialect {
        match self {
            AnyDialect::Action(dialect) => dialect,
            AnyDialect::Chunk(dialect) => dialect,
            AnyDialect::Custom(dialect) => dialect.as_mut(),
        }
    }

    /// Dialect name
    pub fn name(&self) -> &str {
        self.inner().name()
    }

    /// Shared metadata
    pub fn meta(&self) -> &DialectMeta {
        self.inner().meta()
    }

    /// Mutable shared metadata
    pub fn meta_mut(&mut self) -> &mut DialectMeta {
        self.inner_mut().meta_mut()
    }

    /// Correlation id
    pub fn tracker(&self) -> &str {
        self.meta().tracker()
    }

    /// Peer tag
    pub fn owner_tag(&self) -> Option<&str> {
        self.meta().owner_tag()
    }

    /// Set the peer tag
    pub fn set_owner_tag(&mut self, tag: impl Into<String>) {
        self.meta_mut().set_owner_tag(tag);
    }

    /// Translate into a primitive bound to a copy of this dialect
    pub fn translate(&self) -> Option<Primitive> {
        let mut primitive = self.inner().translate()?;
        if let Some(tag) = self.owner_tag() {
            primitive.set_owner_tag(tag);
        }
        primitive.capture(self.clone());
        Some(primitive)
    }

    /// Rebuild from a primitive's stuffs
    pub fn build(&mut self, primitive: &Primitive) {
        self.inner_mut().build(primitive);
    }

    /// Action dialect, if that is what this is
    pub fn as_action(&self) -> Option<&ActionDialect> {
        match self {
            AnyDialect::Action(dialect) => Some(dialect),
            _ => None,
        }
    }

    /// Chunk dialect, if that is what this is
    pub fn as_chunk(&self) -> Option<&ChunkDialect> {
        match self {
            AnyDialect::Chunk(dialect) => Some(dialect),
            _ => None,
        }
    }

    /// Concrete custom dialect
    pub fn downcast_ref<T: Dialect + 'static>(&self) -> Option<&T> {
        match self {
            AnyDialect::Custom(dialect) => dialect.as_any().downcast_ref::<T>(),
            _ => None,
        }
    }
}

impl Clone for AnyDialect {
    fn clone(&self) -> Self {
        match self {
            AnyDialect::Action(dialect) => AnyDialect::Action(dialect.clone()),
            AnyDialect::Chunk(dialect) => AnyDialect::Chunk(dialect.clone()),
            AnyDialect::Custom(dialect) => AnyDialect::Custom(dialect.clone_dialect()),
        }
    }
}

impl From<ActionDialect> for AnyDialect {
    fn from(dialect: ActionDialect) -> Self {
        AnyDialect::Action(dialect)
    }
}

impl From<ChunkDialect> for AnyDialect {
    fn from(dialect: ChunkDialect) -> Self {
        AnyDialect::Chunk(dialect)
    }
}

/// Factory owning the runtime side of one dialect type
///
/// The hook methods default to allowing and ignoring traffic.
pub trait DialectFactory: Send + Sync {
    /// Name of the dialect this factory produces
    fn name(&self) -> &str;

    /// Fresh, empty dialect carrying `tracker`
    fn create(&self, tracker: &str) -> AnyDialect;

    /// Called once a deserialized dialect has been built
    fn built(&self, _dialect: &AnyDialect) {}

    /// Outbound veto; returning `false` stops the talk
    fn on_talk(&self, _identifier: &str, _dialect: &AnyDialect) -> bool {
        true
    }

    /// Outbound observer, after the dialect was handed to the transport
    fn talked(&self, _identifier: &str, _dialect: &AnyDialect) {}

    /// Inbound veto; returning `false` stops delivery to the cellet
    fn on_dialogue(&self, _identifier: &str, _dialect: &AnyDialect) -> bool {
        true
    }

    /// Inbound observer, after delivery to the cellet
    fn dialogued(&self, _identifier: &str, _dialect: &AnyDialect) {}

    /// Release resources held by the factory
    fn shutdown(&self) {}
}
