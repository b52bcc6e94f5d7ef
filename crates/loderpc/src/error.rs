//! # Error Definitions
//!
//! `Error` is the local failure of turning bytes into datagrams or back.
//! `RemoteError` is the remote side failing, carried inside a response.

use std::fmt;

/// Operational failures within the protocol layer itself.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The underlying codec failed (truncated, corrupt, or unencodable data).
    Codec(lodepack::Error),
    /// A datagram was missing a required field.
    MissingField(&'static str),
    /// A field was present but held the wrong shape.
    InvalidField { field: &'static str, details: String },
    /// An unknown status code or failure tag was encountered.
    UnknownVariant(String),
    /// The datagram was structurally inconsistent (e.g. SUCCESS carrying an error).
    ProtocolViolation(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Codec(e) => write!(f, "codec error: {}", e),
            Self::MissingField(name) => write!(f, "missing field '{}'", name),
            Self::InvalidField { field, details } => write!(f, "invalid field '{}': {}", field, details),
            Self::UnknownVariant(tag) => write!(f, "unknown variant: {}", tag),
            Self::ProtocolViolation(msg) => write!(f, "protocol violation: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Codec(e) => Some(e),
            _ => None,
        }
    }
}

impl From<lodepack::Error> for Error {
    fn from(e: lodepack::Error) -> Self { Self::Codec(e) }
}

/// A specialized Result type for protocol operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a remote invocation failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The server holds no binding for the requested service name.
    ServiceNotFound,
    /// The bound service has no method with this name and parameter types.
    MethodNotFound,
    /// Arguments did not match the selected method's signature.
    ArgumentMismatch,
    /// The method exists but may not be invoked remotely.
    AccessDenied,
    /// The request bytes could not be decoded.
    MalformedRequest,
    /// The target method itself failed; carries the error's type name.
    Raised(String),
}

impl FailureReason {
    pub(crate) fn as_tag(&self) -> &str {
        match self {
            Self::ServiceNotFound => "NoService",
            Self::MethodNotFound => "NoMethod",
            Self::ArgumentMismatch => "BadArgs",
            Self::AccessDenied => "Denied",
            Self::MalformedRequest => "Malformed",
            Self::Raised(_) => "Raised",
        }
    }

    pub(crate) fn from_tag(tag: &str, kind: Option<String>) -> Result<Self> {
        match tag {
            "NoService" => Ok(Self::ServiceNotFound),
            "NoMethod" => Ok(Self::MethodNotFound),
            "BadArgs" => Ok(Self::ArgumentMismatch),
            "Denied" => Ok(Self::AccessDenied),
            "Malformed" => Ok(Self::MalformedRequest),
            "Raised" => Ok(Self::Raised(kind.ok_or(Error::MissingField("kind"))?)),
            other => Err(Error::UnknownVariant(format!("failure reason: {}", other))),
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServiceNotFound => f.write_str("service not found"),
            Self::MethodNotFound => f.write_str("method not found"),
            Self::ArgumentMismatch => f.write_str("argument mismatch"),
            Self::AccessDenied => f.write_str("access denied"),
            Self::MalformedRequest => f.write_str("malformed request"),
            Self::Raised(kind) => write!(f, "raised {}", kind),
        }
    }
}

/// The structured failure carried end-to-end in a non-SUCCESS response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    pub reason: FailureReason,
    pub message: String,
}

impl RemoteError {
    pub fn new(reason: FailureReason, message: impl Into<String>) -> Self {
        Self { reason, message: message.into() }
    }

    /// An application-level failure raised by the target method.
    pub fn raised(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(FailureReason::Raised(kind.into()), message)
    }

    /// The error type name for raised failures.
    pub fn kind(&self) -> Option<&str> {
        match &self.reason {
            FailureReason::Raised(kind) => Some(kind),
            _ => None,
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reason, self.message)
    }
}

impl std::error::Error for RemoteError {}
