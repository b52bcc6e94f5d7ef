//! # Lodepack
//!
//! The value model and byte codecs underneath lode rpc.
//!
//! ## Philosophy
//!
//! - **Dynamic at the edge**: every parameter and return value crosses the wire
//!   as a [`Value`]. Typed code converts in and out through [`Wire`].
//! - **Pluggable**: a [`Codec`] turns one `Value` into bytes and back. It knows
//!   nothing about requests, responses, or framing.
//! - **Exact inverses**: `decode(encode(v)) == v` for every codec.

mod binary;
mod json;
mod value;
mod wire;

#[cfg(test)]
mod tests;

pub use binary::BinaryCodec;
pub use json::JsonCodec;
pub use value::Value;
pub use value::ValueType;
pub use wire::Blob;
pub use wire::Wire;

/// Codec and conversion failures.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Buffer exhausted while reading.
    UnexpectedEnd,
    /// Byte does not correspond to a known tag.
    InvalidTag(u8),
    /// String data is not valid UTF-8.
    InvalidUtf8,
    /// Bytes left over after the top-level value.
    TrailingBytes(usize),
    /// Blob or container length exceeds `u32::MAX`.
    BlobTooLarge(usize),
    /// The nested depth of the value exceeded the safety limit.
    RecursionLimitExceeded,
    /// The textual codec rejected the input or output.
    Json(String),
    /// A value did not have the shape its declared type requires.
    TypeMismatch { expected: String, found: String },
    /// A type name could not be parsed.
    UnknownType(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidTag(b) => write!(f, "invalid tag byte: {:#04x}", b),
            Error::TrailingBytes(n) => write!(f, "{} trailing bytes after value", n),
            Error::Json(msg) => write!(f, "json: {}", msg),
            Error::TypeMismatch { expected, found } => {
                write!(f, "type mismatch: expected {}, found {}", expected, found)
            }
            Error::UnknownType(name) => write!(f, "unknown type: {:?}", name),
            _ => write!(f, "{:?}", self),
        }
    }
}

impl std::error::Error for Error {}

/// Specialized `Result` for lodepack operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A serializer strategy: one structured value to bytes and back.
///
/// Chosen once per deployment and shared behind `Arc<dyn Codec>`.
pub trait Codec: Send + Sync + 'static {
    /// Stable identifier of the format (e.g. `"binary"`).
    fn id(&self) -> &'static str;

    /// Encodes a value into a self-contained byte buffer.
    fn encode(&self, value: &Value) -> Result<Vec<u8>>;

    /// Decodes a buffer produced by [`Codec::encode`].
    ///
    /// Must consume the whole buffer; truncated or corrupt input is an error.
    fn decode(&self, bytes: &[u8]) -> Result<Value>;
}
