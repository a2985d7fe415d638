//! Dialect factory registry
//!
//! Maps dialect names to their factories and routes talk/dialogue hooks to
//! the owning factory. One enumerator lives in each nucleus; registration
//! happens at startup, lookups dominate afterwards.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::{AnyDialect, DialectFactory};
use crate::talk::primitive::Primitive;

/// Registry of dialect factories keyed by dialect name
pub struct DialectEnumerator {
    factories: RwLock<HashMap<String, Arc<dyn DialectFactory>>>,
}

impl DialectEnumerator {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// Register a factory under its dialect name, returning any factory it replaced
    pub fn add_factory(&self, factory: Arc<dyn DialectFactory>) -> Option<Arc<dyn DialectFactory>> {
        let name = factory.name().to_string();
        tracing::debug!(dialect = %name, "registering dialect factory");
        self.factories.write().insert(name, factory)
    }

    /// Unregister a factory
    pub fn remove_factory(&self, name: &str) -> Option<Arc<dyn DialectFactory>> {
        self.factories.write().remove(name)
    }

    /// Look up a factory
    pub fn factory(&self, name: &str) -> Option<Arc<dyn DialectFactory>> {
        self.factories.read().get(name).cloned()
    }

    /// Check whether a dialect name is registered
    pub fn has_factory(&self, name: &str) -> bool {
        self.factories.read().contains_key(name)
    }

    /// Registered dialect names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Create an empty dialect of the named type
    ///
    /// Unknown names are logged and yield `None`.
    pub fn create_dialect(&self, name: &str, tracker: &str) -> Option<AnyDialect> {
        match self.factory(name) {
            Some(factory) => Some(factory.create(tracker)),
            None => {
                tracing::warn!(dialect = %name, "no factory registered for dialect");
                None
            }
        }
    }

    /// Create a dialect and build it from a decoded primitive
    ///
    /// The dialect inherits the primitive's owner tag before `build` runs, and
    /// the factory's `built` hook sees the finished dialect.
    pub fn rebuild(&self, name: &str, tracker: &str, primitive: &Primitive) -> Option<AnyDialect> {
        let factory = match self.factory(name) {
            Some(factory) => factory,
            None => {
                tracing::warn!(dialect = %name, "no factory registered for dialect");
                return None;
            }
        };

        let mut dialect = factory.create(tracker);
        if let Some(tag) = primitive.owner_tag() {
            dialect.set_owner_tag(tag);
        }
        dialect.build(primitive);
        factory.built(&dialect);
        Some(dialect)
    }

    /// Outbound veto check; unknown dialects are never vetoed
    pub fn do_talk(&self, identifier: &str, dialect: &AnyDialect) -> bool {
        self.factory(dialect.name())
            .map_or(true, |factory| factory.on_talk(identifier, dialect))
    }

    /// Outbound notification after transmission
    pub fn did_talk(&self, identifier: &str, dialect: &AnyDialect) {
        if let Some(factory) = self.factory(dialect.name()) {
            factory.talked(identifier, dialect);
        }
    }

    /// Inbound veto check; unknown dialects are never vetoed
    pub fn do_dialogue(&self, identifier: &str, dialect: &AnyDialect) -> bool {
        self.factory(dialect.name())
            .map_or(true, |factory| factory.on_dialogue(identifier, dialect))
    }

    /// Inbound notification after delivery
    pub fn did_dialogue(&self, identifier: &str, dialect: &AnyDialect) {
        if let Some(factory) = self.factory(dialect.name()) {
            factory.dialogued(identifier, dialect);
        }
    }

    /// Shut down every registered factory
    pub fn shutdown_all(&self) {
        let factories: Vec<_> = self.factories.read().values().cloned().collect();
        for factory in factories {
            tracing::debug!(dialect = %factory.name(), "shutting down dialect factory");
            factory.shutdown();
        }
    }
}

impl Default for DialectEnumerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::talk::dialect::ActionDialect;
    use crate::talk::stuff::Stuff;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct VetoFactory {
        shutdowns: AtomicUsize,
    }

    impl DialectFactory for VetoFactory {
        fn name(&self) -> &str {
            ActionDialect::NAME
        }

        fn create(&self, tracker: &str) -> AnyDialect {
            ActionDialect::new(tracker).into()
        }

        fn on_talk(&self, _identifier: &str, _dialect: &AnyDialect) -> bool {
            false
        }

        fn shutdown(&self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_unknown_dialect_yields_none() {
        let enumerator = DialectEnumerator::new();
        assert!(enumerator.create_dialect("Nope", "t").is_none());
        assert!(enumerator.rebuild("Nope", "t", &Primitive::new()).is_none());
    }

    #[test]
    fn test_rebuild_inherits_owner_tag() {
        let enumerator = DialectEnumerator::new();
        enumerator.add_factory(Arc::new(VetoFactory {
            shutdowns: AtomicUsize::new(0),
        }));

        let mut primitive = Primitive::with_owner("peer-7");
        primitive.commit(Stuff::predicate("ping"));

        let dialect = enumerator
            .rebuild(ActionDialect::NAME, "trk", &primitive)
            .unwrap();
        assert_eq!(dialect.tracker(), "trk");
        assert_eq!(dialect.owner_tag(), Some("peer-7"));
        assert_eq!(dialect.as_action().unwrap().action(), "ping");
    }

    #[test]
    fn test_hooks_route_to_factory() {
        let enumerator = DialectEnumerator::new();
        let factory = Arc::new(VetoFactory {
            shutdowns: AtomicUsize::new(0),
        });
        enumerator.add_factory(factory.clone());

        let dialect: AnyDialect = ActionDialect::new("t").into();
        assert!(!enumerator.do_talk("cellet", &dialect));
        assert!(enumerator.do_dialogue("cellet", &dialect));

        enumerator.shutdown_all();
        assert_eq!(factory.shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(enumerator.names(), vec![ActionDialect::NAME.to_string()]);
    }
}
