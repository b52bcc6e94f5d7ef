//! # JSON Codec
//!
//! A textual codec over `serde_json`. Values keep their variant names, so the
//! integer and byte variants survive the round trip. JSON has no spelling for
//! NaN or the infinities, so values carrying them are refused on encode.

use crate::Codec;
use crate::Error;
use crate::Result;
use crate::Value;

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl JsonCodec {
    pub const ID: &'static str = "json";
}

impl Codec for JsonCodec {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        check_finite(value)?;
        serde_json::to_vec(value).map_err(|e| Error::Json(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        serde_json::from_slice(bytes).map_err(|e| Error::Json(e.to_string()))
    }
}

fn check_finite(value: &Value) -> Result<()> {
    match value {
        Value::F64(f) if !f.is_finite() => Err(Error::Json(format!("{} has no JSON form", f))),
        Value::List(items) => items.iter().try_for_each(check_finite),
        Value::Map(entries) => entries.values().try_for_each(check_finite),
        _ => Ok(()),
    }
}
