//! # Binary Codec
//!
//! A compact tag-length-value encoding of [`Value`].
//!
//! ## Format
//!
//! - **Scalars**: `[Tag: 1b][Data: N]`
//! - **Blobs**: `[Tag: 1b][Len: 4b][Data: Len]`
//! - **Containers**: `[Tag: 1b][Len: 4b][Body: Len]`
//!
//! Map bodies are a sequence of `[String blob key][value]` pairs. All integers
//! are Little-Endian. Container lengths are back-patched once the body is written.

use std::collections::BTreeMap;

use crate::Codec;
use crate::Error;
use crate::Result;
use crate::Value;

/// The maximum nesting depth for values before refusing to continue.
const MAX_RECURSION_DEPTH: usize = 64;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    BoolTrue = 0x01,
    BoolFalse = 0x02,
    U64 = 0x06,
    S64 = 0x0A,
    F64 = 0x0C,
    Unit = 0x0E,
    String = 0x10,
    Bytes = 0x11,
    List = 0x20,
    Map = 0x21,
}

impl Tag {
    fn from_u8(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Tag::BoolTrue),
            0x02 => Some(Tag::BoolFalse),
            0x06 => Some(Tag::U64),
            0x0A => Some(Tag::S64),
            0x0C => Some(Tag::F64),
            0x0E => Some(Tag::Unit),
            0x10 => Some(Tag::String),
            0x11 => Some(Tag::Bytes),
            0x20 => Some(Tag::List),
            0x21 => Some(Tag::Map),
            _ => None,
        }
    }
}

/// The default structured-object codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryCodec;

impl BinaryCodec {
    pub const ID: &'static str = "binary";
}

impl Codec for BinaryCodec {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        let mut enc = Encoder { buf: Vec::with_capacity(256) };
        enc.value(value, 0)?;
        Ok(enc.buf)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        let mut dec = Decoder { buf: bytes, pos: 0 };
        let value = dec.value(0)?;
        match dec.remaining() {
            0 => Ok(value),
            n => Err(Error::TrailingBytes(n)),
        }
    }
}

struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    fn value(&mut self, value: &Value, depth: usize) -> Result<()> {
        if depth > MAX_RECURSION_DEPTH {
            return Err(Error::RecursionLimitExceeded);
        }

        match value {
            Value::Unit => self.tag(Tag::Unit),
            Value::Bool(b) => self.tag(if *b { Tag::BoolTrue } else { Tag::BoolFalse }),
            Value::I64(v) => {
                self.tag(Tag::S64);
                self.buf.extend_from_slice(&v.to_le_bytes());
            }
            Value::U64(v) => {
                self.tag(Tag::U64);
                self.buf.extend_from_slice(&v.to_le_bytes());
            }
            Value::F64(v) => {
                self.tag(Tag::F64);
                self.buf.extend_from_slice(&v.to_le_bytes());
            }
            Value::String(s) => self.blob(Tag::String, s.as_bytes())?,
            Value::Bytes(b) => self.blob(Tag::Bytes, b)?,
            Value::List(items) => {
                let start = self.begin(Tag::List);
                for item in items {
                    self.value(item, depth + 1)?;
                }
                self.end(start)?;
            }
            Value::Map(entries) => {
                let start = self.begin(Tag::Map);
                for (key, item) in entries {
                    self.blob(Tag::String, key.as_bytes())?;
                    self.value(item, depth + 1)?;
                }
                self.end(start)?;
            }
        }
        Ok(())
    }

    fn tag(&mut self, tag: Tag) {
        self.buf.push(tag as u8);
    }

    fn blob(&mut self, tag: Tag, data: &[u8]) -> Result<()> {
        let len = u32::try_from(data.len()).map_err(|_| Error::BlobTooLarge(data.len()))?;
        self.tag(tag);
        self.buf.extend_from_slice(&len.to_le_bytes());
        self.buf.extend_from_slice(data);
        Ok(())
    }

    /// Writes the tag and a length placeholder, returning where the body starts.
    fn begin(&mut self, tag: Tag) -> usize {
        self.tag(tag);
        self.buf.extend_from_slice(&[0, 0, 0, 0]);
        self.buf.len()
    }

    fn end(&mut self, start: usize) -> Result<()> {
        let body_len = self.buf.len() - start;
        let len = u32::try_from(body_len).map_err(|_| Error::BlobTooLarge(body_len))?;
        self.buf[start - 4..start].copy_from_slice(&len.to_le_bytes());
        Ok(())
    }
}

/// A bounds-checked view over an input buffer.
struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::UnexpectedEnd);
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn length(&mut self) -> Result<usize> {
        Ok(u32::from_le_bytes(self.array()?) as usize)
    }

    fn tag(&mut self) -> Result<Tag> {
        let [b] = self.array::<1>()?;
        Tag::from_u8(b).ok_or(Error::InvalidTag(b))
    }

    fn string(&mut self) -> Result<String> {
        let len = self.length()?;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|_| Error::InvalidUtf8)
    }

    /// Splits off a container body as its own decoder.
    fn body(&mut self) -> Result<Decoder<'a>> {
        let len = self.length()?;
        Ok(Decoder { buf: self.take(len)?, pos: 0 })
    }

    fn value(&mut self, depth: usize) -> Result<Value> {
        if depth > MAX_RECURSION_DEPTH {
            return Err(Error::RecursionLimitExceeded);
        }

        let value = match self.tag()? {
            Tag::Unit => Value::Unit,
            Tag::BoolTrue => Value::Bool(true),
            Tag::BoolFalse => Value::Bool(false),
            Tag::S64 => Value::I64(i64::from_le_bytes(self.array()?)),
            Tag::U64 => Value::U64(u64::from_le_bytes(self.array()?)),
            Tag::F64 => Value::F64(f64::from_le_bytes(self.array()?)),
            Tag::String => Value::String(self.string()?),
            Tag::Bytes => {
                let len = self.length()?;
                Value::Bytes(self.take(len)?.to_vec())
            }
            Tag::List => {
                let mut body = self.body()?;
                let mut items = Vec::new();
                while body.remaining() > 0 {
                    items.push(body.value(depth + 1)?);
                }
                Value::List(items)
            }
            Tag::Map => {
                let mut body = self.body()?;
                let mut entries = BTreeMap::new();
                while body.remaining() > 0 {
                    match body.tag()? {
                        Tag::String => {}
                        other => return Err(Error::InvalidTag(other as u8)),
                    }
                    let key = body.string()?;
                    let item = body.value(depth + 1)?;
                    entries.insert(key, item);
                }
                Value::Map(entries)
            }
        };
        Ok(value)
    }
}
