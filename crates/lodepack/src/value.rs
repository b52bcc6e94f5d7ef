//! # Values and Types
//!
//! `Value` is the closed set of shapes a call argument or return value may take.
//! `ValueType` names those shapes and is what a request carries to select one
//! method overload.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// A dynamically typed value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Unit,
    Bool(bool),
    I64(i64),
    U64(u64),
    F64(f64),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Short name of the variant, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Unit => "unit",
            Value::Bool(_) => "bool",
            Value::I64(_) => "i64",
            Value::U64(_) => "u64",
            Value::F64(_) => "f64",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    /// Checks whether this value is an inhabitant of `ty`.
    pub fn conforms_to(&self, ty: &ValueType) -> bool {
        match (self, ty) {
            (_, ValueType::Any) => true,
            (Value::Unit, ValueType::Unit) => true,
            (Value::Bool(_), ValueType::Bool) => true,
            (Value::I64(_), ValueType::I64) => true,
            (Value::U64(_), ValueType::U64) => true,
            (Value::F64(_), ValueType::F64) => true,
            (Value::String(_), ValueType::String) => true,
            (Value::Bytes(_), ValueType::Bytes) => true,
            (Value::List(items), ValueType::List(inner)) => items.iter().all(|v| v.conforms_to(inner)),
            (Value::Map(entries), ValueType::Map(inner)) => entries.values().all(|v| v.conforms_to(inner)),
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Builds a `TypeMismatch` error describing this value against `expected`.
    pub fn mismatch(&self, expected: impl fmt::Display) -> Error {
        Error::TypeMismatch {
            expected: expected.to_string(),
            found: self.kind().to_string(),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

/// The declared type of a parameter.
///
/// The canonical text form (`Display`/`FromStr`) is what travels on the wire,
/// e.g. `"string"` or `"map<list<i64>>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueType {
    Unit,
    Bool,
    I64,
    U64,
    F64,
    String,
    Bytes,
    List(Box<ValueType>),
    Map(Box<ValueType>),
    /// Accepts any value.
    Any,
}

impl ValueType {
    pub fn list(inner: ValueType) -> Self {
        ValueType::List(Box::new(inner))
    }

    pub fn map(inner: ValueType) -> Self {
        ValueType::Map(Box::new(inner))
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Unit => f.write_str("unit"),
            ValueType::Bool => f.write_str("bool"),
            ValueType::I64 => f.write_str("i64"),
            ValueType::U64 => f.write_str("u64"),
            ValueType::F64 => f.write_str("f64"),
            ValueType::String => f.write_str("string"),
            ValueType::Bytes => f.write_str("bytes"),
            ValueType::Any => f.write_str("any"),
            ValueType::List(inner) => write!(f, "list<{}>", inner),
            ValueType::Map(inner) => write!(f, "map<{}>", inner),
        }
    }
}

impl FromStr for ValueType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let ty = match s {
            "unit" => ValueType::Unit,
            "bool" => ValueType::Bool,
            "i64" => ValueType::I64,
            "u64" => ValueType::U64,
            "f64" => ValueType::F64,
            "string" => ValueType::String,
            "bytes" => ValueType::Bytes,
            "any" => ValueType::Any,
            _ => {
                if let Some(inner) = generic_arg(s, "list") {
                    ValueType::list(inner.parse()?)
                } else if let Some(inner) = generic_arg(s, "map") {
                    ValueType::map(inner.parse()?)
                } else {
                    return Err(Error::UnknownType(s.to_string()));
                }
            }
        };
        Ok(ty)
    }
}

/// Returns the text between `name<` and the final `>`.
fn generic_arg<'a>(s: &'a str, name: &str) -> Option<&'a str> {
    s.strip_prefix(name)?.strip_prefix('<')?.strip_suffix('>')
}
