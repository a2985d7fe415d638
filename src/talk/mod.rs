//! Talk layer: primitives, their wire format, and dialects
//!
//! A [`Primitive`] is the base message unit exchanged between a cellet and a
//! peer. Dialects are typed sub-protocols that translate themselves into a
//! primitive and rebuild themselves from one.

pub mod dialect;
pub mod error;
pub mod primitive;
pub mod serializer;
pub mod stuff;

pub use dialect::{AnyDialect, Dialect, DialectEnumerator, DialectFactory, DialectMeta};
pub use error::{ProtocolError, ProtocolResult};
pub use primitive::Primitive;
pub use serializer::{ParseMode, PrimitiveSerializer};
pub use stuff::{IntoLiteral, LiteralBase, Stuff, StuffType};
