//! # Typed Conversion
//!
//! `Wire` maps a Rust type onto a `ValueType` and converts in both directions.
//! Generated client stubs use it to build requests; generated server adapters
//! use it to decode arguments.

use std::collections::BTreeMap;

use crate::Error;
use crate::Result;
use crate::Value;
use crate::ValueType;

/// A Rust type that can cross the wire as a [`Value`].
pub trait Wire: Sized {
    /// The declared type used for overload selection.
    fn value_type() -> ValueType;

    fn into_value(self) -> Value;

    /// Fails with `TypeMismatch` when the value has the wrong shape.
    fn from_value(value: Value) -> Result<Self>;
}

/// Raw bytes, carried as `Value::Bytes` rather than a list of integers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Blob(pub Vec<u8>);

macro_rules! wire_scalar {
    ($ty:ty, $variant:ident) => {
        impl Wire for $ty {
            fn value_type() -> ValueType { ValueType::$variant }
            fn into_value(self) -> Value { Value::$variant(self) }
            fn from_value(value: Value) -> Result<Self> {
                match value {
                    Value::$variant(v) => Ok(v),
                    other => Err(other.mismatch(ValueType::$variant)),
                }
            }
        }
    };
}

wire_scalar!(bool, Bool);
wire_scalar!(i64, I64);
wire_scalar!(u64, U64);
wire_scalar!(f64, F64);
wire_scalar!(String, String);

/// Narrow integers widen onto the 64-bit variants and are range checked on the way back.
macro_rules! wire_narrow {
    ($ty:ty, $variant:ident, $wide:ty) => {
        impl Wire for $ty {
            fn value_type() -> ValueType { ValueType::$variant }
            fn into_value(self) -> Value { Value::$variant(self as $wide) }
            fn from_value(value: Value) -> Result<Self> {
                match value {
                    Value::$variant(v) => <$ty>::try_from(v).map_err(|_| Error::TypeMismatch {
                        expected: stringify!($ty).to_string(),
                        found: format!("{} out of range", v),
                    }),
                    other => Err(other.mismatch(ValueType::$variant)),
                }
            }
        }
    };
}

wire_narrow!(i32, I64, i64);
wire_narrow!(u32, U64, u64);

impl Wire for () {
    fn value_type() -> ValueType { ValueType::Unit }
    fn into_value(self) -> Value { Value::Unit }
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Unit => Ok(()),
            other => Err(other.mismatch(ValueType::Unit)),
        }
    }
}

impl Wire for Value {
    fn value_type() -> ValueType { ValueType::Any }
    fn into_value(self) -> Value { self }
    fn from_value(value: Value) -> Result<Self> { Ok(value) }
}

impl Wire for Blob {
    fn value_type() -> ValueType { ValueType::Bytes }
    fn into_value(self) -> Value { Value::Bytes(self.0) }
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Bytes(b) => Ok(Blob(b)),
            other => Err(other.mismatch(ValueType::Bytes)),
        }
    }
}

impl<T: Wire> Wire for Vec<T> {
    fn value_type() -> ValueType {
        ValueType::list(T::value_type())
    }

    fn into_value(self) -> Value {
        Value::List(self.into_iter().map(Wire::into_value).collect())
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::List(items) => items.into_iter().map(T::from_value).collect(),
            other => Err(other.mismatch(Self::value_type())),
        }
    }
}

impl<T: Wire> Wire for BTreeMap<String, T> {
    fn value_type() -> ValueType {
        ValueType::map(T::value_type())
    }

    fn into_value(self) -> Value {
        Value::Map(self.into_iter().map(|(k, v)| (k, v.into_value())).collect())
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Map(entries) => entries
                .into_iter()
                .map(|(k, v)| Ok((k, T::from_value(v)?)))
                .collect(),
            other => Err(other.mismatch(Self::value_type())),
        }
    }
}
