//! # LodeRPC
//!
//! The wire protocol of lode rpc: request and response datagrams, and the
//! message protocols that marshal them through a pluggable codec.
//!
//! ## Architecture
//!
//! - **Datagrams** (`RequestDatagram`, `ResponseDatagram`) are format independent.
//! - **MessageProtocol** lowers a datagram onto a `lodepack::Value` map and hands
//!   it to one `Codec`. Encode and decode are exact inverses.
//! - **Protocols** is the fixed, id-keyed set a process supports.
//!
//! Framing is not handled here; one marshalled datagram is one frame.

mod datagram;
mod error;
mod protocol;


pub use datagram::RequestDatagram;
pub use datagram::ResponseDatagram;
pub use datagram::StatusCode;
pub use error::Error;
pub use error::FailureReason;
pub use error::RemoteError;
pub use error::Result;
pub use protocol::MessageProtocol;
pub use protocol::Protocols;
