//! Action dialect: a named action with ordered parameters
//!
//! On the wire an action dialect is one predicate stuff (the action) followed
//! by subject/objective pairs, the subject holding the parameter name and the
//! objective its value. Duplicate parameter names are legal.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use super::action_factory::{ActionDelegate, ActionDialectFactory};
use super::{Dialect, DialectMeta};
use crate::talk::primitive::Primitive;
use crate::talk::stuff::{IntoLiteral, Stuff, StuffType};

/// Remote-procedure style dialect
#[derive(Clone, Default)]
pub struct ActionDialect {
    meta: DialectMeta,
    action: String,
    params: Vec<(String, Stuff)>,
    context: Option<Arc<dyn Any + Send + Sync>>,
}

impl ActionDialect {
    /// Dialect name
    pub const NAME: &'static str = "ActionDialect";

    /// Create an empty action dialect
    pub fn new(tracker: impl Into<String>) -> Self {
        Self {
            meta: DialectMeta::new(tracker),
            ..Self::default()
        }
    }

    /// Builder form of [`set_action`](Self::set_action)
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = action.into();
        self
    }

    /// Builder form of [`append_param`](Self::append_param)
    pub fn with_param(mut self, name: impl Into<String>, value: impl IntoLiteral) -> Self {
        self.append_param(name, value);
        self
    }

    /// Action name
    pub fn action(&self) -> &str {
        &self.action
    }

    /// Set the action name
    pub fn set_action(&mut self, action: impl Into<String>) {
        self.action = action.into();
    }

    /// Append a parameter
    pub fn append_param(&mut self, name: impl Into<String>, value: impl IntoLiteral) {
        self.params
            .push((name.into(), Stuff::new(StuffType::Objective, value)));
    }

    /// Append a parameter from an existing stuff
    pub fn append_stuff_param(&mut self, name: impl Into<String>, value: Stuff) {
        self.params
            .push((name.into(), value.with_kind(StuffType::Objective)));
    }

    /// First parameter with the given name
    pub fn param(&self, name: &str) -> Option<&Stuff> {
        self.params
            .iter()
            .find(|(param, _)| param == name)
            .map(|(_, value)| value)
    }

    /// Whether a parameter with the given name exists
    pub fn exists_param(&self, name: &str) -> bool {
        self.param(name).is_some()
    }

    /// Parameter as text
    pub fn param_as_string(&self, name: &str) -> Option<&str> {
        self.param(name).map(Stuff::as_str)
    }

    /// Parameter as `i32`
    pub fn param_as_int(&self, name: &str) -> Option<i32> {
        self.param(name).and_then(Stuff::as_int)
    }

    /// Parameter as `i64`
    pub fn param_as_long(&self, name: &str) -> Option<i64> {
        self.param(name).and_then(Stuff::as_long)
    }

    /// Parameter as `bool`
    pub fn param_as_bool(&self, name: &str) -> Option<bool> {
        self.param(name).and_then(Stuff::as_bool)
    }

    /// Parameter as a JSON document
    pub fn param_as_json(&self, name: &str) -> Option<serde_json::Value> {
        self.param(name).and_then(Stuff::as_json)
    }

    /// All parameters in order
    pub fn params(&self) -> impl Iterator<Item = (&str, &Stuff)> {
        self.params.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Number of parameters
    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    /// Attach an application context; it never goes on the wire
    pub fn set_context<T: Any + Send + Sync>(&mut self, context: T) {
        self.context = Some(Arc::new(context));
    }

    /// Application context, if one of type `T` is attached
    pub fn context<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.context.as_deref()?.downcast_ref::<T>()
    }

    /// Hand this dialect to the factory's workers, running `delegate` on it
    ///
    /// Returns `false` if the factory has been shut down.
    pub fn act(self, factory: &ActionDialectFactory, delegate: Arc<dyn ActionDelegate>) -> bool {
        factory.do_action(self, delegate)
    }
}

impl Dialect for ActionDialect {
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
        if self.action.is_empty() {
            tracing::warn!(tracker = %self.meta.tracker(), "action dialect has no action");
            return None;
        }

        let mut primitive = Primitive::new();
        primitive.commit(Stuff::predicate(self.action.as_str()));
        for (name, value) in &self.params {
            primitive.commit(Stuff::subject(name.as_str()));
            primitive.commit(value.clone().with_kind(StuffType::Objective));
        }
        Some(primitive)
    }

    fn build(&mut self, primitive: &Primitive) {
        if let Some(action) = primitive.predicates().first() {
            self.action = action.value().to_string();
        }

        let names = primitive.subjects();
        let values = primitive.objectives();
        if names.len() != values.len() {
            tracing::warn!(
                names = names.len(),
                values = values.len(),
                "action dialect parameter lists differ in length"
            );
        }

        self.params = names
            .iter()
            .zip(values)
            .map(|(name, value)| (name.value().to_string(), value.clone()))
            .collect();
    }

    fn clone_dialect(&self) -> Box<dyn Dialect> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl PartialEq for ActionDialect {
    fn eq(&self, other: &Self) -> bool {
        self.meta.tracker() == other.meta.tracker()
            && self.action == other.action
            && self.params == other.params
    }
}

impl fmt::Debug for ActionDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionDialect")
            .field("meta", &self.meta)
            .field("action", &self.action)
            .field("params", &self.params)
            .field("context", &self.context.is_some())
            .finish()
    }
}
