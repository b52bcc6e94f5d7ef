//! # Service Directory Layout
//!
//! Where providers appear in the coordination store:
//!
//! ```text
//! /<namespace>/service/<service name>/<percent-encoded JSON location>
//! ```
//!
//! The location lives entirely in the child's name, so listing a service
//! directory is enough to enumerate its providers.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The child name is not valid percent-encoding of UTF-8.
    Escape(String),
    /// The decoded name is not a serialized location.
    Json(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Escape(msg) => write!(f, "invalid escaping: {}", msg),
            Self::Json(msg) => write!(f, "invalid location: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Where one provider of a service can be reached and how to talk to it.
///
/// Two locations are the same provider iff all three fields match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceLocation {
    name: String,
    address: String,
    protocol: String,
}

impl ServiceLocation {
    pub fn new(name: impl Into<String>, address: impl Into<String>, protocol: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            protocol: protocol.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `host:port`.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// The single path segment this location is published under.
    pub fn to_node_name(&self) -> Result<String> {
        let json = serde_json::to_string(self)?;
        Ok(urlencoding::encode(&json).into_owned())
    }

    pub fn from_node_name(node: &str) -> Result<Self> {
        let json = urlencoding::decode(node).map_err(|e| Error::Escape(e.to_string()))?;
        Ok(serde_json::from_str(&json)?)
    }
}

impl fmt::Display for ServiceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}/{}", self.name, self.address, self.protocol)
    }
}

/// Path arithmetic for one namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryLayout {
    root: String,
}

impl DirectoryLayout {
    pub fn new(namespace: &str) -> Self {
        Self { root: format!("/{}/service", namespace.trim_matches('/')) }
    }

    /// `/<namespace>/service`
    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn service_path(&self, name: &str) -> String {
        format!("{}/{}", self.root, name)
    }

    pub fn provider_path(&self, location: &ServiceLocation) -> Result<String> {
        Ok(format!("{}/{}", self.service_path(location.name()), location.to_node_name()?))
    }
}
