//! Stuffs: the typed terms a primitive is made of
//!
//! Every stuff keeps its value as the canonical string encoding of its
//! literal base, which is exactly what goes on the wire.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Grammatical role of a stuff inside a primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StuffType {
    /// `sub`
    #[serde(rename = "sub")]
    Subject,
    /// `pre`
    #[serde(rename = "pre")]
    Predicate,
    /// `obj`
    #[serde(rename = "obj")]
    Objective,
    /// `att`
    #[serde(rename = "att")]
    Attributive,
    /// `adv`
    #[serde(rename = "adv")]
    Adverbial,
    /// `com`
    #[serde(rename = "com")]
    Complement,
}

impl StuffType {
    /// All stuff types in wire order
    pub const ALL: [StuffType; 6] = [
        StuffType::Subject,
        StuffType::Predicate,
        StuffType::Objective,
        StuffType::Attributive,
        StuffType::Adverbial,
        StuffType::Complement,
    ];

    /// Three-letter wire tag
    pub fn tag(&self) -> &'static str {
        match self {
            StuffType::Subject => "sub",
            StuffType::Predicate => "pre",
            StuffType::Objective => "obj",
            StuffType::Attributive => "att",
            StuffType::Adverbial => "adv",
            StuffType::Complement => "com",
        }
    }

    /// Resolve a wire tag. Only the first three bytes are significant.
    pub fn from_tag(tag: &[u8]) -> Option<Self> {
        match tag.get(..3)? {
            b"sub" => Some(StuffType::Subject),
            b"pre" => Some(StuffType::Predicate),
            b"obj" => Some(StuffType::Objective),
            b"att" => Some(StuffType::Attributive),
            b"adv" => Some(StuffType::Adverbial),
            b"com" => Some(StuffType::Complement),
            _ => None,
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            StuffType::Subject => 0,
            StuffType::Predicate => 1,
            StuffType::Objective => 2,
            StuffType::Attributive => 3,
            StuffType::Adverbial => 4,
            StuffType::Complement => 5,
        }
    }
}

impl fmt::Display for StuffType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Literal type of a stuff value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LiteralBase {
    /// UTF-8 text
    String,
    /// 32-bit signed integer
    Int,
    /// 32-bit unsigned integer
    UInt,
    /// 64-bit signed integer
    Long,
    /// 64-bit unsigned integer
    ULong,
    /// 32-bit float, 4 decimal places
    Float,
    /// 64-bit float, 4 decimal places
    Double,
    /// `true` / `false`
    Bool,
    /// Compact JSON text
    Json,
    /// XML text
    Xml,
}

impl LiteralBase {
    /// Wire tag of this literal base
    pub fn as_str(&self) -> &'static str {
        match self {
            LiteralBase::String => "string",
            LiteralBase::Int => "int",
            LiteralBase::UInt => "uint",
            LiteralBase::Long => "long",
            LiteralBase::ULong => "ulong",
            LiteralBase::Float => "float",
            LiteralBase::Double => "double",
            LiteralBase::Bool => "bool",
            LiteralBase::Json => "json",
            LiteralBase::Xml => "xml",
        }
    }

    /// Parse a wire tag; `None` for anything unrecognised
    pub fn parse(tag: &[u8]) -> Option<Self> {
        match tag {
            b"string" => Some(LiteralBase::String),
            b"int" => Some(LiteralBase::Int),
            b"uint" => Some(LiteralBase::UInt),
            b"long" => Some(LiteralBase::Long),
            b"ulong" => Some(LiteralBase::ULong),
            b"float" => Some(LiteralBase::Float),
            b"double" => Some(LiteralBase::Double),
            b"bool" => Some(LiteralBase::Bool),
            b"json" => Some(LiteralBase::Json),
            b"xml" => Some(LiteralBase::Xml),
            _ => None,
        }
    }
}

impl fmt::Display for LiteralBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Conversion of a Rust value into a canonical stuff value and its literal base
pub trait IntoLiteral {
    /// Canonical string encoding and literal base
    fn into_literal(self) -> (String, LiteralBase);
}

impl IntoLiteral for &str {
    fn into_literal(self) -> (String, LiteralBase) {
        (self.to_string(), LiteralBase::String)
    }
}

impl IntoLiteral for String {
    fn into_literal(self) -> (String, LiteralBase) {
        (self, LiteralBase::String)
    }
}

impl IntoLiteral for &String {
    fn into_literal(self) -> (String, LiteralBase) {
        (self.clone(), LiteralBase::String)
    }
}

impl IntoLiteral for i32 {
    fn into_literal(self) -> (String, LiteralBase) {
        (self.to_string(), LiteralBase::Int)
    }
}

impl IntoLiteral for u32 {
    fn into_literal(self) -> (String, LiteralBase) {
        (self.to_string(), LiteralBase::UInt)
    }
}

impl IntoLiteral for i64 {
    fn into_literal(self) -> (String, LiteralBase) {
        (self.to_string(), LiteralBase::Long)
    }
}

impl IntoLiteral for u64 {
    fn into_literal(self) -> (String, LiteralBase) {
        (self.to_string(), LiteralBase::ULong)
    }
}

impl IntoLiteral for f32 {
    fn into_literal(self) -> (String, LiteralBase) {
        (format!("{:.4}", self), LiteralBase::Float)
    }
}

impl IntoLiteral for f64 {
    fn into_literal(self) -> (String, LiteralBase) {
        (format!("{:.4}", self), LiteralBase::Double)
    }
}

impl IntoLiteral for bool {
    fn into_literal(self) -> (String, LiteralBase) {
        (self.to_string(), LiteralBase::Bool)
    }
}

impl IntoLiteral for serde_json::Value {
    fn into_literal(self) -> (String, LiteralBase) {
        (self.to_string(), LiteralBase::Json)
    }
}

impl IntoLiteral for &serde_json::Value {
    fn into_literal(self) -> (String, LiteralBase) {
        (self.to_string(), LiteralBase::Json)
    }
}

/// One typed term of a primitive
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Stuff {
    kind: StuffType,
    value: String,
    literal: LiteralBase,
}

impl Stuff {
    /// Create a stuff from any value with a literal encoding
    pub fn new(kind: StuffType, value: impl IntoLiteral) -> Self {
        let (value, literal) = value.into_literal();
        Self {
            kind,
            value,
            literal,
        }
    }

    /// Create a stuff from an already-encoded value
    ///
    /// The caller is responsible for `value` being canonical for `literal`.
    pub fn with_literal(kind: StuffType, value: impl Into<String>, literal: LiteralBase) -> Self {
        Self {
            kind,
            value: value.into(),
            literal,
        }
    }

    /// Create an XML stuff
    pub fn xml(kind: StuffType, text: impl Into<String>) -> Self {
        Self::with_literal(kind, text, LiteralBase::Xml)
    }

    /// Subject stuff
    pub fn subject(value: impl IntoLiteral) -> Self {
        Self::new(StuffType::Subject, value)
    }

    /// Predicate stuff
    pub fn predicate(value: impl IntoLiteral) -> Self {
        Self::new(StuffType::Predicate, value)
    }

    /// Objective stuff
    pub fn objective(value: impl IntoLiteral) -> Self {
        Self::new(StuffType::Objective, value)
    }

    /// Attributive stuff
    pub fn attributive(value: impl IntoLiteral) -> Self {
        Self::new(StuffType::Attributive, value)
    }

    /// Adverbial stuff
    pub fn adverbial(value: impl IntoLiteral) -> Self {
        Self::new(StuffType::Adverbial, value)
    }

    /// Complement stuff
    pub fn complement(value: impl IntoLiteral) -> Self {
        Self::new(StuffType::Complement, value)
    }

    /// Same value and literal under another stuff type
    pub fn with_kind(mut self, kind: StuffType) -> Self {
        self.kind = kind;
        self
    }

    /// Stuff type
    pub fn kind(&self) -> StuffType {
        self.kind
    }

    /// Canonical string value
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Literal base
    pub fn literal(&self) -> LiteralBase {
        self.literal
    }

    /// Value as text, whatever the literal
    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Value as `i32`
    pub fn as_int(&self) -> Option<i32> {
        self.value.parse().ok()
    }

    /// Value as `u32`
    pub fn as_uint(&self) -> Option<u32> {
        self.value.parse().ok()
    }

    /// Value as `i64`
    pub fn as_long(&self) -> Option<i64> {
        self.value.parse().ok()
    }

    /// Value as `u64`
    pub fn as_ulong(&self) -> Option<u64> {
        self.value.parse().ok()
    }

    /// Value as `f32`
    pub fn as_float(&self) -> Option<f32> {
        self.value.parse().ok()
    }

    /// Value as `f64`
    pub fn as_double(&self) -> Option<f64> {
        self.value.parse().ok()
    }

    /// Value as `bool` (`true`/`false`, case-insensitive)
    pub fn as_bool(&self) -> Option<bool> {
        if self.value.eq_ignore_ascii_case("true") {
            Some(true)
        } else if self.value.eq_ignore_ascii_case("false") {
            Some(false)
        } else {
            None
        }
    }

    /// Value parsed as a JSON document
    pub fn as_json(&self) -> Option<serde_json::Value> {
        serde_json::from_str(&self.value).ok()
    }
}

impl fmt::Display for Stuff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}:{}", self.kind, self.value, self.literal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_floats_use_four_decimals() {
        let stuff = Stuff::objective(1.5f32);
        assert_eq!(stuff.value(), "1.5000");
        assert_eq!(stuff.literal(), LiteralBase::Float);

        let stuff = Stuff::objective(std::f64::consts::PI);
        assert_eq!(stuff.value(), "3.1416");
        assert_eq!(stuff.literal(), LiteralBase::Double);
    }

    #[test]
    fn test_typed_accessors() {
        assert_eq!(Stuff::subject(-7i32).as_int(), Some(-7));
        assert_eq!(Stuff::subject(7u32).as_uint(), Some(7));
        assert_eq!(Stuff::subject(1i64 << 40).as_long(), Some(1 << 40));
        assert_eq!(Stuff::subject(u64::MAX).as_ulong(), Some(u64::MAX));
        assert_eq!(Stuff::subject(true).as_bool(), Some(true));
        assert_eq!(Stuff::subject("TRUE").as_bool(), Some(true));
        assert_eq!(Stuff::subject("nope").as_bool(), None);
        assert_eq!(Stuff::subject("abc").as_int(), None);

        let doc = json!({"a": [1, 2]});
        let stuff = Stuff::objective(&doc);
        assert_eq!(stuff.literal(), LiteralBase::Json);
        assert_eq!(stuff.as_json(), Some(doc));
    }

    #[test]
    fn test_tags() {
        for kind in StuffType::ALL {
            assert_eq!(StuffType::from_tag(kind.tag().as_bytes()), Some(kind));
        }
        assert_eq!(StuffType::from_tag(b"subject"), Some(StuffType::Subject));
        assert_eq!(StuffType::from_tag(b"su"), None);
        assert_eq!(LiteralBase::parse(b"ulong"), Some(LiteralBase::ULong));
        assert_eq!(LiteralBase::parse(b"uLong"), None);
    }

    #[test]
    fn test_with_kind_keeps_value() {
        let stuff = Stuff::subject(42i32).with_kind(StuffType::Objective);
        assert_eq!(stuff.kind(), StuffType::Objective);
        assert_eq!(stuff.value(), "42");
        assert_eq!(stuff.literal(), LiteralBase::Int);
    }
}
