//! # Datagrams
//!
//! One request per call attempt, one response per request. Both are independent
//! of the byte format; see `protocol` for how they are lowered onto a codec.

use std::collections::BTreeMap;
use std::fmt;

use lodepack::Value;
use lodepack::ValueType;

use crate::error::FailureReason;
use crate::error::RemoteError;

/// Outcome class of a response. Numeric codes are what travel on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Success,
    NotFound,
    Error,
}

impl StatusCode {
    pub fn code(self) -> u64 {
        match self {
            Self::Success => 200,
            Self::NotFound => 404,
            Self::Error => 500,
        }
    }

    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            200 => Some(Self::Success),
            404 => Some(Self::NotFound),
            500 => Some(Self::Error),
            _ => None,
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("SUCCESS"),
            Self::NotFound => f.write_str("NOT FOUND"),
            Self::Error => f.write_str("ERROR"),
        }
    }
}

/// A single method invocation, addressed by service name and overload.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDatagram {
    pub service_name: String,
    pub method_name: String,
    pub headers: BTreeMap<String, String>,
    pub parameter_types: Vec<ValueType>,
    pub parameters: Vec<Value>,
}

impl RequestDatagram {
    pub fn new(
        service_name: impl Into<String>,
        method_name: impl Into<String>,
        parameter_types: Vec<ValueType>,
        parameters: Vec<Value>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            method_name: method_name.into(),
            headers: BTreeMap::new(),
            parameter_types,
            parameters,
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// `name(type, type)`, for diagnostics.
    pub fn signature(&self) -> String {
        let types: Vec<String> = self.parameter_types.iter().map(ToString::to_string).collect();
        format!("{}({})", self.method_name, types.join(", "))
    }
}

/// The reply to one request.
///
/// Exactly one of the return value and the error is present: SUCCESS carries
/// a value, NOT_FOUND and ERROR carry an error. The constructors are the only
/// way to build one, so the pairing cannot drift.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseDatagram {
    status: StatusCode,
    headers: BTreeMap<String, String>,
    body: std::result::Result<Value, RemoteError>,
}

impl ResponseDatagram {
    pub fn success(value: Value) -> Self {
        Self { status: StatusCode::Success, headers: BTreeMap::new(), body: Ok(value) }
    }

    pub fn not_found(error: RemoteError) -> Self {
        Self { status: StatusCode::NotFound, headers: BTreeMap::new(), body: Err(error) }
    }

    pub fn error(error: RemoteError) -> Self {
        Self { status: StatusCode::Error, headers: BTreeMap::new(), body: Err(error) }
    }

    /// Picks NOT_FOUND for missing services and ERROR for everything else.
    pub fn failure(error: RemoteError) -> Self {
        match error.reason {
            FailureReason::ServiceNotFound => Self::not_found(error),
            _ => Self::error(error),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn return_value(&self) -> Option<&Value> {
        self.body.as_ref().ok()
    }

    pub fn error_value(&self) -> Option<&RemoteError> {
        self.body.as_ref().err()
    }

    pub fn into_result(self) -> std::result::Result<Value, RemoteError> {
        self.body
    }

    pub(crate) fn from_parts(
        status: StatusCode,
        headers: BTreeMap<String, String>,
        body: std::result::Result<Value, RemoteError>,
    ) -> Self {
        Self { status, headers, body }
    }
}
