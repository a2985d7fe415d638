//! Primitive wire format and JSON transcoding
//!
//! Wire grammar:
//!
//! ```text
//! [1.0]{sub=value:string}{pre=42:int}...[DialectName@tracker]
//! ```
//!
//! Value bytes equal to `{`, `}`, `=` or `:` are written with a leading
//! backslash. The reader is an explicit byte automaton; a backslash before a
//! non-structural byte is kept together with that byte.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::io::{BufRead, ErrorKind, Write};

use super::dialect::DialectEnumerator;
use super::error::{ProtocolError, ProtocolResult};
use super::primitive::Primitive;
use super::stuff::{LiteralBase, Stuff, StuffType};
use crate::PROTOCOL_VERSION;

const ESCAPE: u8 = b'\\';

fn is_structural(byte: u8) -> bool {
    matches!(byte, b'{' | b'}' | b'=' | b':')
}

/// How decode problems are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseMode {
    /// Log and drop malformed stuffs, keep the rest
    #[default]
    Lenient,
    /// Fail on the first malformed stuff
    Strict,
}

/// Reader automaton states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    /// Before the version block
    Unknown,
    /// Inside `[version]`
    Version,
    /// After the version block, before the first stuff
    Stuff,
    /// Inside a stuff type tag
    Type,
    /// Inside a stuff value
    Value,
    /// Inside a stuff literal tag
    Literal,
    /// After a stuff: another stuff or the dialect block may follow
    Dialect,
}

impl ParseState {
    /// Lowercase state name
    pub fn name(&self) -> &'static str {
        match self {
            ParseState::Unknown => "unknown",
            ParseState::Version => "version",
            ParseState::Stuff => "stuff",
            ParseState::Type => "type",
            ParseState::Value => "value",
            ParseState::Literal => "literal",
            ParseState::Dialect => "dialect",
        }
    }
}

/// Raw pieces of one stuff as read off the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawStuff {
    /// Type tag bytes
    pub tag: Vec<u8>,
    /// Unescaped value bytes
    pub value: Vec<u8>,
    /// Literal tag bytes
    pub literal: Vec<u8>,
}

/// Result of feeding one byte to the [`Automaton`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Nothing complete yet
    Continue,
    /// A stuff was closed
    Stuff(RawStuff),
    /// The dialect block `name@tracker` was closed
    Dialect(Vec<u8>),
}

/// Byte-at-a-time primitive reader
#[derive(Debug)]
pub struct Automaton {
    state: ParseState,
    version: Vec<u8>,
    tag: Vec<u8>,
    value: Vec<u8>,
    literal: Vec<u8>,
    header: Option<Vec<u8>>,
    escaped: bool,
}

impl Automaton {
    /// Start in the `Unknown` state
    pub fn new() -> Self {
        Self {
            state: ParseState::Unknown,
            version: Vec::new(),
            tag: Vec::new(),
            value: Vec::new(),
            literal: Vec::new(),
            header: None,
            escaped: false,
        }
    }

    /// Current state
    pub fn state(&self) -> ParseState {
        self.state
    }

    /// Version bytes read so far
    pub fn version(&self) -> &[u8] {
        &self.version
    }

    /// Whether the stream may end here without losing a stuff
    pub fn at_boundary(&self) -> bool {
        matches!(self.state, ParseState::Stuff | ParseState::Dialect) && self.header.is_none()
    }

    /// Advance by one byte
    pub fn feed(&mut self, byte: u8) -> Step {
        match self.state {
            ParseState::Unknown => {
                if byte == b'[' {
                    self.state = ParseState::Version;
                }
            }
            ParseState::Version => {
                if byte == b']' {
                    self.state = ParseState::Stuff;
                } else {
                    self.version.push(byte);
                }
            }
            ParseState::Stuff | ParseState::Dialect => {
                if let Some(header) = self.header.as_mut() {
                    if byte == b']' {
                        let header = self.header.take().unwrap_or_default();
                        return Step::Dialect(header);
                    }
                    header.push(byte);
                } else if byte == b'{' {
                    self.tag.clear();
                    self.state = ParseState::Type;
                } else if byte == b'[' {
                    self.header = Some(Vec::new());
                }
            }
            ParseState::Type => {
                if byte == b'=' {
                    self.tag.truncate(3);
                    self.value.clear();
                    self.escaped = false;
                    self.state = ParseState::Value;
                } else {
                    self.tag.push(byte);
                }
            }
            ParseState::Value => {
                if self.escaped {
                    self.escaped = false;
                    if !is_structural(byte) {
                        self.value.push(ESCAPE);
                    }
                    self.value.push(byte);
                } else if byte == ESCAPE {
                    self.escaped = true;
                } else if byte == b':' {
                    self.literal.clear();
                    self.state = ParseState::Literal;
                } else {
                    self.value.push(byte);
                }
            }
            ParseState::Literal => {
                if byte == b'}' {
                    self.state = ParseState::Dialect;
                    return Step::Stuff(RawStuff {
                        tag: std::mem::take(&mut self.tag),
                        value: std::mem::take(&mut self.value),
                        literal: std::mem::take(&mut self.literal),
                    });
                }
                self.literal.push(byte);
            }
        }
        Step::Continue
    }
}

impl Default for Automaton {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PrimitiveDocument {
    version: String,
    #[serde(default)]
    stuffs: Vec<StuffDocument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dialect: Option<DialectDocument>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StuffDocument {
    #[serde(rename = "type")]
    kind: String,
    value: Value,
    literal: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct DialectDocument {
    name: String,
    tracker: String,
}

/// Reads and writes primitives, resolving dialect blocks through a registry
#[derive(Clone, Copy)]
pub struct PrimitiveSerializer<'a> {
    dialects: Option<&'a DialectEnumerator>,
    mode: ParseMode,
}

impl<'a> PrimitiveSerializer<'a> {
    /// Serializer that builds dialects through `dialects`
    pub fn new(dialects: &'a DialectEnumerator) -> Self {
        Self {
            dialects: Some(dialects),
            mode: ParseMode::Lenient,
        }
    }

    /// Serializer that ignores dialect blocks on read
    pub fn without_dialects() -> Self {
        Self {
            dialects: None,
            mode: ParseMode::Lenient,
        }
    }

    /// Use the given parse mode
    pub fn with_mode(mut self, mode: ParseMode) -> Self {
        self.mode = mode;
        self
    }

    /// Parse mode in effect
    pub fn mode(&self) -> ParseMode {
        self.mode
    }

    /// Encode a primitive into wire bytes
    pub fn serialize(primitive: &Primitive) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 + primitive.len() * 16);
        out.push(b'[');
        out.extend_from_slice(PROTOCOL_VERSION.as_bytes());
        out.push(b']');

        for stuff in primitive.stuffs() {
            out.push(b'{');
            out.extend_from_slice(stuff.kind().tag().as_bytes());
            out.push(b'=');
            for &byte in stuff.value().as_bytes() {
                if is_structural(byte) {
                    out.push(ESCAPE);
                }
                out.push(byte);
            }
            out.push(b':');
            out.extend_from_slice(stuff.literal().as_str().as_bytes());
            out.push(b'}');
        }

        if let Some(dialect) = primitive.dialect() {
            out.push(b'[');
            out.extend_from_slice(dialect.name().as_bytes());
            out.push(b'@');
            out.extend_from_slice(dialect.tracker().as_bytes());
            out.push(b']');
        }
        out
    }

    /// Write a primitive to a stream
    ///
    /// IO failures are logged and abort the write; the stream should be
    /// discarded.
    pub fn write<W: Write>(writer: &mut W, primitive: &Primitive) -> ProtocolResult<()> {
        let encoded = Self::serialize(primitive);
        writer
            .write_all(&encoded)
            .and_then(|()| writer.flush())
            .map_err(|err| {
                tracing::warn!(error = %err, "failed to write primitive");
                ProtocolError::from(err)
            })
    }

    /// Read one primitive from a stream into `primitive`
    ///
    /// Stops after the dialect block if there is one, otherwise at end of
    /// stream. Only the bytes of this primitive are consumed, so a stream of
    /// concatenated primitives can be read with repeated calls on the same
    /// reader.
    pub fn read<R: BufRead>(&self, primitive: &mut Primitive, mut reader: R) -> ProtocolResult<()> {
        let mut automaton = Automaton::new();
        loop {
            let buf = match reader.fill_buf() {
                Ok(buf) => buf,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    tracing::warn!(error = %err, state = automaton.state().name(), "failed to read primitive");
                    return Err(err.into());
                }
            };
            if buf.is_empty() {
                break;
            }

            let mut used = 0;
            let mut finished = false;
            for &byte in buf {
                used += 1;
                match automaton.feed(byte) {
                    Step::Continue => {}
                    Step::Stuff(raw) => self.inject(primitive, raw)?,
                    Step::Dialect(header) => {
                        self.bind_dialect(primitive, &header);
                        finished = true;
                        break;
                    }
                }
            }
            reader.consume(used);
            if finished {
                return Ok(());
            }
        }

        if !automaton.at_boundary() {
            let state = automaton.state().name();
            match self.mode {
                ParseMode::Strict => return Err(ProtocolError::UnexpectedEof { state }),
                ParseMode::Lenient => {
                    tracing::warn!(state, stuffs = primitive.len(), "primitive stream ended early");
                }
            }
        }
        Ok(())
    }

    /// Decode a primitive from bytes, owned by `owner_tag` if given
    pub fn deserialize(&self, bytes: &[u8], owner_tag: Option<&str>) -> ProtocolResult<Primitive> {
        let mut primitive = match owner_tag {
            Some(tag) => Primitive::with_owner(tag),
            None => Primitive::new(),
        };
        self.read(&mut primitive, bytes)?;
        Ok(primitive)
    }

    fn inject(&self, primitive: &mut Primitive, raw: RawStuff) -> ProtocolResult<()> {
        let Some(kind) = StuffType::from_tag(&raw.tag) else {
            let tag = String::from_utf8_lossy(&raw.tag).into_owned();
            return self.reject(ProtocolError::UnknownStuffType(tag));
        };
        let Some(literal) = LiteralBase::parse(&raw.literal) else {
            let literal = String::from_utf8_lossy(&raw.literal).into_owned();
            return self.reject(ProtocolError::UnknownLiteral(literal));
        };

        let value = match String::from_utf8(raw.value) {
            Ok(value) => value,
            Err(err) => match self.mode {
                ParseMode::Strict => {
                    return Err(ProtocolError::InvalidValue {
                        literal: literal.to_string(),
                        value: String::from_utf8_lossy(err.as_bytes()).into_owned(),
                    });
                }
                ParseMode::Lenient => String::from_utf8_lossy(err.as_bytes()).into_owned(),
            },
        };

        primitive.commit(Stuff::with_literal(kind, value, literal));
        Ok(())
    }

    fn reject(&self, error: ProtocolError) -> ProtocolResult<()> {
        match self.mode {
            ParseMode::Strict => Err(error),
            ParseMode::Lenient => {
                tracing::warn!(error = %error, "dropping malformed stuff");
                Ok(())
            }
        }
    }

    fn bind_dialect(&self, primitive: &mut Primitive, header: &[u8]) {
        let header = String::from_utf8_lossy(header);
        let (name, tracker) = header
            .split_once('@')
            .unwrap_or((header.as_ref(), super::dialect::DEFAULT_TRACKER));

        let Some(dialects) = self.dialects else {
            tracing::debug!(dialect = %name, "no dialect registry, leaving primitive unbound");
            return;
        };

        if let Some(dialect) = dialects.rebuild(name, tracker, primitive) {
            primitive.capture(dialect);
        }
    }

    /// Transcode a primitive into its JSON document
    ///
    /// XML stuffs have no JSON form and are skipped.
    pub fn to_json(primitive: &Primitive) -> Value {
        let stuffs = primitive
            .stuffs()
            .filter_map(|stuff| {
                let value = json_value(stuff)?;
                Some(StuffDocument {
                    kind: stuff.kind().tag().to_string(),
                    value,
                    literal: stuff.literal().as_str().to_string(),
                })
            })
            .collect();

        let document = PrimitiveDocument {
            version: PROTOCOL_VERSION.to_string(),
            stuffs,
            dialect: primitive.dialect().map(|dialect| DialectDocument {
                name: dialect.name().to_string(),
                tracker: dialect.tracker().to_string(),
            }),
        };

        serde_json::to_value(document).unwrap_or(Value::Null)
    }

    /// Pretty-printed JSON document text
    pub fn to_json_string(primitive: &Primitive) -> ProtocolResult<String> {
        Ok(serde_json::to_string_pretty(&Self::to_json(primitive))?)
    }

    /// Read a JSON document into `primitive`
    pub fn read_json(&self, primitive: &mut Primitive, document: &Value) -> ProtocolResult<()> {
        let document = PrimitiveDocument::deserialize(document)?;

        for stuff in document.stuffs {
            let Some(kind) = StuffType::from_tag(stuff.kind.as_bytes()) else {
                self.reject(ProtocolError::UnknownStuffType(stuff.kind))?;
                continue;
            };
            let Some(literal) = LiteralBase::parse(stuff.literal.as_bytes()) else {
                self.reject(ProtocolError::UnknownLiteral(stuff.literal))?;
                continue;
            };

            match canonical_value(&stuff.value, literal) {
                Ok(value) => primitive.commit(Stuff::with_literal(kind, value, literal)),
                Err(err) => self.reject(err)?,
            }
        }

        if let Some(header) = document.dialect {
            match self.dialects {
                Some(dialects) => {
                    if let Some(dialect) = dialects.rebuild(&header.name, &header.tracker, primitive) {
                        primitive.capture(dialect);
                    }
                }
                None => {
                    tracing::debug!(dialect = %header.name, "no dialect registry, leaving primitive unbound");
                }
            }
        }
        Ok(())
    }

    /// Decode a primitive from JSON text
    pub fn from_json_str(&self, text: &str, owner_tag: Option<&str>) -> ProtocolResult<Primitive> {
        let document: Value = serde_json::from_str(text)?;
        let mut primitive = match owner_tag {
            Some(tag) => Primitive::with_owner(tag),
            None => Primitive::new(),
        };
        self.read_json(&mut primitive, &document)?;
        Ok(primitive)
    }
}

fn json_value(stuff: &Stuff) -> Option<Value> {
    let text = stuff.value();
    let value = match stuff.literal() {
        LiteralBase::String => Value::String(text.to_string()),
        LiteralBase::Int | LiteralBase::Long => stuff
            .as_long()
            .map_or_else(|| Value::String(text.to_string()), Value::from),
        LiteralBase::UInt | LiteralBase::ULong => stuff
            .as_ulong()
            .map_or_else(|| Value::String(text.to_string()), Value::from),
        LiteralBase::Float | LiteralBase::Double => stuff
            .as_double()
            .and_then(Number::from_f64)
            .map_or_else(|| Value::String(text.to_string()), Value::Number),
        LiteralBase::Bool => stuff
            .as_bool()
            .map_or_else(|| Value::String(text.to_string()), Value::Bool),
        LiteralBase::Json => stuff
            .as_json()
            .unwrap_or_else(|| Value::String(text.to_string())),
        LiteralBase::Xml => {
            tracing::warn!("XML stuffs are not supported in JSON documents, skipping");
            return None;
        }
    };
    Some(value)
}

fn canonical_value(value: &Value, literal: LiteralBase) -> ProtocolResult<String> {
    let invalid = || ProtocolError::InvalidValue {
        literal: literal.to_string(),
        value: value.to_string(),
    };

    let text = match literal {
        LiteralBase::String => match value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        },
        LiteralBase::Int => value
            .as_i64()
            .and_then(|n| i32::try_from(n).ok())
            .ok_or_else(invalid)?
            .to_string(),
        LiteralBase::UInt => value
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(invalid)?
            .to_string(),
        LiteralBase::Long => value.as_i64().ok_or_else(invalid)?.to_string(),
        LiteralBase::ULong => value.as_u64().ok_or_else(invalid)?.to_string(),
        LiteralBase::Float | LiteralBase::Double => {
            format!("{:.4}", value.as_f64().ok_or_else(invalid)?)
        }
        LiteralBase::Bool => value.as_bool().ok_or_else(invalid)?.to_string(),
        LiteralBase::Json => value.to_string(),
        LiteralBase::Xml => {
            return Err(ProtocolError::Unsupported(
                "XML stuffs in JSON documents".to_string(),
            ));
        }
    };
    Ok(text)
}
