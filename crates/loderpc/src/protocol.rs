//! # Message Protocols
//!
//! A `MessageProtocol` pairs the datagram layout with one `Codec`.
//!
//! Datagrams are lowered to a `Value::Map` keyed by field name before the codec
//! sees them, so every codec gets the same structure.
//!
//! ## Invariants
//! - **Panic Safety**: All decoding paths return `Result`, never panicking on unknown data.
//! - **Forward Compatibility**: Unknown fields are skipped.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

use lodepack::BinaryCodec;
use lodepack::Codec;
use lodepack::JsonCodec;
use lodepack::Value;
use lodepack::ValueType;

use crate::datagram::RequestDatagram;
use crate::datagram::ResponseDatagram;
use crate::datagram::StatusCode;
use crate::error::Error;
use crate::error::FailureReason;
use crate::error::RemoteError;
use crate::error::Result;

/// Marshals datagrams to bytes and back through a single codec.
#[derive(Clone)]
pub struct MessageProtocol {
    codec: Arc<dyn Codec>,
}

impl MessageProtocol {
    pub fn new(codec: Arc<dyn Codec>) -> Self {
        Self { codec }
    }

    pub fn binary() -> Self {
        Self::new(Arc::new(BinaryCodec))
    }

    pub fn json() -> Self {
        Self::new(Arc::new(JsonCodec))
    }

    /// The protocol id, which is the id of its codec.
    pub fn id(&self) -> &'static str {
        self.codec.id()
    }

    pub fn marshal_request(&self, req: &RequestDatagram) -> Result<Vec<u8>> {
        Ok(self.codec.encode(&lower_request(req))?)
    }

    pub fn unmarshal_request(&self, bytes: &[u8]) -> Result<RequestDatagram> {
        lift_request(self.codec.decode(bytes)?)
    }

    pub fn marshal_response(&self, rsp: &ResponseDatagram) -> Result<Vec<u8>> {
        Ok(self.codec.encode(&lower_response(rsp))?)
    }

    pub fn unmarshal_response(&self, bytes: &[u8]) -> Result<ResponseDatagram> {
        lift_response(self.codec.decode(bytes)?)
    }
}

impl std::fmt::Debug for MessageProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageProtocol").field("id", &self.id()).finish()
    }
}

/// The fixed set of protocols a process understands, keyed by id.
///
/// Protocols are looked up, never negotiated.
#[derive(Debug, Clone)]
pub struct Protocols {
    by_id: HashMap<String, MessageProtocol>,
}

impl Protocols {
    pub fn empty() -> Self {
        Self { by_id: HashMap::new() }
    }

    /// Binary and JSON.
    pub fn supported() -> Self {
        let mut set = Self::empty();
        set.insert(MessageProtocol::binary());
        set.insert(MessageProtocol::json());
        set
    }

    pub fn insert(&mut self, protocol: MessageProtocol) {
        self.by_id.insert(protocol.id().to_string(), protocol);
    }

    pub fn get(&self, id: &str) -> Option<&MessageProtocol> {
        self.by_id.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.by_id.keys().map(String::as_str)
    }
}

impl Default for Protocols {
    fn default() -> Self {
        Self::supported()
    }
}

// Lowering

fn lower_request(req: &RequestDatagram) -> Value {
    let mut map = BTreeMap::new();
    map.insert("service".to_string(), Value::String(req.service_name.clone()));
    map.insert("method".to_string(), Value::String(req.method_name.clone()));
    map.insert("headers".to_string(), lower_headers(&req.headers));
    map.insert(
        "types".to_string(),
        Value::List(req.parameter_types.iter().map(|t| Value::String(t.to_string())).collect()),
    );
    map.insert("args".to_string(), Value::List(req.parameters.clone()));
    Value::Map(map)
}

fn lower_response(rsp: &ResponseDatagram) -> Value {
    let mut map = BTreeMap::new();
    map.insert("status".to_string(), Value::U64(rsp.status().code()));
    map.insert("headers".to_string(), lower_headers(rsp.headers()));
    match (rsp.return_value(), rsp.error_value()) {
        (Some(value), _) => {
            map.insert("result".to_string(), value.clone());
        }
        (_, Some(error)) => {
            map.insert("error".to_string(), lower_error(error));
        }
        (None, None) => {}
    }
    Value::Map(map)
}

fn lower_error(error: &RemoteError) -> Value {
    let mut map = BTreeMap::new();
    map.insert("reason".to_string(), Value::String(error.reason.as_tag().to_string()));
    if let Some(kind) = error.kind() {
        map.insert("kind".to_string(), Value::String(kind.to_string()));
    }
    map.insert("message".to_string(), Value::String(error.message.clone()));
    Value::Map(map)
}

fn lower_headers(headers: &BTreeMap<String, String>) -> Value {
    Value::Map(
        headers
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    )
}

// Lifting

fn lift_request(value: Value) -> Result<RequestDatagram> {
    let mut fields = Fields::new(value)?;

    let parameter_types = fields
        .list("types")?
        .into_iter()
        .map(|t| match t {
            Value::String(s) => s.parse::<ValueType>().map_err(Error::from),
            other => Err(invalid("types", other.mismatch("string"))),
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(RequestDatagram {
        service_name: fields.string("service")?,
        method_name: fields.string("method")?,
        headers: fields.headers()?,
        parameter_types,
        parameters: fields.list("args")?,
    })
}

fn lift_response(value: Value) -> Result<ResponseDatagram> {
    let mut fields = Fields::new(value)?;

    let code = match fields.take("status")? {
        Value::U64(code) => code,
        other => return Err(invalid("status", other.mismatch("u64"))),
    };
    let status = StatusCode::from_code(code)
        .ok_or_else(|| Error::UnknownVariant(format!("status code: {}", code)))?;
    let headers = fields.headers()?;

    let result = fields.take_opt("result");
    let error = fields.take_opt("error");

    let body = match (status, result, error) {
        (StatusCode::Success, Some(value), None) => Ok(value),
        (StatusCode::NotFound | StatusCode::Error, None, Some(error)) => Err(lift_error(error)?),
        (status, result, error) => {
            return Err(Error::ProtocolViolation(format!(
                "{} response with result present: {}, error present: {}",
                status,
                result.is_some(),
                error.is_some(),
            )));
        }
    };

    Ok(ResponseDatagram::from_parts(status, headers, body))
}

fn lift_error(value: Value) -> Result<RemoteError> {
    let mut fields = Fields::new(value)?;
    let tag = fields.string("reason")?;
    let kind = match fields.take_opt("kind") {
        Some(Value::String(kind)) => Some(kind),
        Some(other) => return Err(invalid("kind", other.mismatch("string"))),
        None => None,
    };
    let reason = FailureReason::from_tag(&tag, kind)?;
    Ok(RemoteError::new(reason, fields.string("message")?))
}

fn invalid(field: &'static str, e: lodepack::Error) -> Error {
    Error::InvalidField { field, details: e.to_string() }
}

/// Field-by-field access to a lowered datagram.
struct Fields(BTreeMap<String, Value>);

impl Fields {
    fn new(value: Value) -> Result<Self> {
        match value {
            Value::Map(map) => Ok(Self(map)),
            other => Err(Error::ProtocolViolation(format!(
                "expected a map at the top level, found {}",
                other.kind()
            ))),
        }
    }

    fn take_opt(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    fn take(&mut self, field: &'static str) -> Result<Value> {
        self.take_opt(field).ok_or(Error::MissingField(field))
    }

    fn string(&mut self, field: &'static str) -> Result<String> {
        match self.take(field)? {
            Value::String(s) => Ok(s),
            other => Err(invalid(field, other.mismatch("string"))),
        }
    }

    fn list(&mut self, field: &'static str) -> Result<Vec<Value>> {
        match self.take(field)? {
            Value::List(items) => Ok(items),
            other => Err(invalid(field, other.mismatch("list"))),
        }
    }

    /// Headers are optional on the wire; absence means empty.
    fn headers(&mut self) -> Result<BTreeMap<String, String>> {
        let entries = match self.take_opt("headers") {
            None => return Ok(BTreeMap::new()),
            Some(Value::Map(entries)) => entries,
            Some(other) => return Err(invalid("headers", other.mismatch("map<string>"))),
        };
        entries
            .into_iter()
            .map(|(k, v)| match v {
                Value::String(s) => Ok((k, s)),
                other => Err(invalid("headers", other.mismatch("string"))),
            })
            .collect()
    }
}
