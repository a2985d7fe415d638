//! The primitive message unit
//!
//! A primitive keeps one ordered list per stuff type and may be bound to a
//! single dialect. Equality only looks at the stuffs.

use super::dialect::AnyDialect;
use super::stuff::{Stuff, StuffType};

/// Base structured message exchanged between cellets and peers
#[derive(Debug, Clone, Default)]
pub struct Primitive {
    stuffs: [Vec<Stuff>; 6],
    owner_tag: Option<String>,
    dialect: Option<AnyDialect>,
}

impl Primitive {
    /// Create an empty primitive
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty primitive owned by a peer
    pub fn with_owner(tag: impl Into<String>) -> Self {
        Self {
            owner_tag: Some(tag.into()),
            ..Self::default()
        }
    }

    /// Append a stuff after the existing stuffs of the same type
    pub fn commit(&mut self, stuff: Stuff) {
        self.stuffs[stuff.kind().index()].push(stuff);
    }

    /// Stuffs of one type in insertion order
    pub fn stuffs_of(&self, kind: StuffType) -> &[Stuff] {
        &self.stuffs[kind.index()]
    }

    /// Subject stuffs
    pub fn subjects(&self) -> &[Stuff] {
        self.stuffs_of(StuffType::Subject)
    }

    /// Predicate stuffs
    pub fn predicates(&self) -> &[Stuff] {
        self.stuffs_of(StuffType::Predicate)
    }

    /// Objective stuffs
    pub fn objectives(&self) -> &[Stuff] {
        self.stuffs_of(StuffType::Objective)
    }

    /// Attributive stuffs
    pub fn attributives(&self) -> &[Stuff] {
        self.stuffs_of(StuffType::Attributive)
    }

    /// Adverbial stuffs
    pub fn adverbials(&self) -> &[Stuff] {
        self.stuffs_of(StuffType::Adverbial)
    }

    /// Complement stuffs
    pub fn complements(&self) -> &[Stuff] {
        self.stuffs_of(StuffType::Complement)
    }

    /// All stuffs in wire order (sub, pre, obj, att, adv, com)
    pub fn stuffs(&self) -> impl Iterator<Item = &Stuff> {
        self.stuffs.iter().flatten()
    }

    /// Total number of stuffs
    pub fn len(&self) -> usize {
        self.stuffs.iter().map(Vec::len).sum()
    }

    /// Whether the primitive carries no stuffs
    pub fn is_empty(&self) -> bool {
        self.stuffs.iter().all(Vec::is_empty)
    }

    /// Remove every stuff, keeping owner and dialect binding
    pub fn clear_stuffs(&mut self) {
        for list in &mut self.stuffs {
            list.clear();
        }
    }

    /// Peer tag this primitive came from or is addressed to
    pub fn owner_tag(&self) -> Option<&str> {
        self.owner_tag.as_deref()
    }

    /// Set the owner tag, propagating it to a bound dialect
    pub fn set_owner_tag(&mut self, tag: impl Into<String>) {
        let tag = tag.into();
        if let Some(dialect) = self.dialect.as_mut() {
            dialect.set_owner_tag(tag.clone());
        }
        self.owner_tag = Some(tag);
    }

    /// Whether a dialect is bound
    pub fn is_dialectal(&self) -> bool {
        self.dialect.is_some()
    }

    /// Bound dialect
    pub fn dialect(&self) -> Option<&AnyDialect> {
        self.dialect.as_ref()
    }

    /// Mutable bound dialect
    pub fn dialect_mut(&mut self) -> Option<&mut AnyDialect> {
        self.dialect.as_mut()
    }

    /// Bind a dialect, replacing any previous binding
    pub fn capture(&mut self, dialect: AnyDialect) {
        self.dialect = Some(dialect);
    }

    /// Unbind and return the dialect
    pub fn take_dialect(&mut self) -> Option<AnyDialect> {
        self.dialect.take()
    }
}

impl PartialEq for Primitive {
    fn eq(&self, other: &Self) -> bool {
        self.stuffs == other.stuffs
    }
}
