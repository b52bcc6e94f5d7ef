//! # Server-Side Dispatch
//!
//! Turns a request frame into a response frame against the local bindings.
//!
//! ## Invariants
//! - **Total**: every input, including garbage, yields a response. Nothing
//!   escapes as a panic or a dropped connection.
//! - Missing service is NOT_FOUND; every other failure is ERROR.
//! - Arity and declared types are checked before the target runs.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use lodepack::Value;
use lodepack::ValueType;
use loderpc::FailureReason;
use loderpc::MessageProtocol;
use loderpc::Protocols;
use loderpc::RemoteError;
use loderpc::RequestDatagram;
use loderpc::ResponseDatagram;
use tracing::debug;
use tracing::error;
use tracing::warn;

use crate::config::RpcConfig;
use crate::registrar::LocalServices;

/// A service implementation reachable by method name and parameter types.
///
/// Usually generated by `service!`; implement it by hand for dynamic services.
#[async_trait::async_trait]
pub trait Dispatch: Send + Sync + 'static {
    /// The service name this implementation answers to.
    fn interface(&self) -> &str;

    /// Invokes the overload `method(parameter_types)`.
    ///
    /// `arguments` has already been checked against `parameter_types`.
    async fn invoke(
        &self,
        method: &str,
        parameter_types: &[ValueType],
        arguments: Vec<Value>,
    ) -> Result<Value, RemoteError>;
}

pub struct Dispatcher {
    protocol: MessageProtocol,
    services: Arc<LocalServices>,
}

impl Dispatcher {
    pub fn new(protocol: MessageProtocol, services: Arc<LocalServices>) -> Self {
        Self { protocol, services }
    }

    /// A dispatcher speaking `config.protocol`, if this process supports it.
    pub fn for_config(config: &RpcConfig, services: Arc<LocalServices>) -> Option<Self> {
        let protocol = Protocols::supported().get(&config.protocol)?.clone();
        Some(Self::new(protocol, services))
    }

    pub fn protocol(&self) -> &MessageProtocol {
        &self.protocol
    }

    /// Decodes, dispatches and encodes one request frame.
    pub async fn handle(&self, request: &[u8]) -> Vec<u8> {
        let response = match self.protocol.unmarshal_request(request) {
            Ok(request) => self.dispatch(request).await,
            Err(e) => {
                warn!(error = %e, bytes = request.len(), "undecodable request");
                ResponseDatagram::error(RemoteError::new(FailureReason::MalformedRequest, e.to_string()))
            }
        };
        self.encode(response)
    }

    /// Like `handle`, but a response longer than `max_len` is replaced by an
    /// ERROR response saying so, so it still fits in one frame.
    pub async fn handle_bounded(&self, request: &[u8], max_len: usize) -> Vec<u8> {
        let response = self.handle(request).await;
        if response.len() <= max_len {
            return response;
        }
        warn!(bytes = response.len(), max_len, "response too large for a frame");
        self.encode(ResponseDatagram::error(RemoteError::raised(
            "ResponseTooLarge",
            format!("response of {} bytes exceeds the {} byte frame limit", response.len(), max_len),
        )))
    }

    pub async fn dispatch(&self, request: RequestDatagram) -> ResponseDatagram {
        let Some(binding) = self.services.get(&request.service_name) else {
            debug!(service = %request.service_name, "no binding");
            return ResponseDatagram::not_found(RemoteError::new(
                FailureReason::ServiceNotFound,
                format!("no service bound as '{}'", request.service_name),
            ));
        };

        let signature = request.signature();
        if let Err(e) = check_arguments(&request.parameter_types, &request.parameters) {
            debug!(service = %request.service_name, %signature, error = %e, "rejected arguments");
            return ResponseDatagram::error(e);
        }

        let call = binding
            .instance()
            .invoke(&request.method_name, &request.parameter_types, request.parameters);
        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(Ok(value)) => ResponseDatagram::success(value),
            Ok(Err(e)) => {
                debug!(service = %request.service_name, %signature, error = %e, "call failed");
                ResponseDatagram::error(e)
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(service = %request.service_name, %signature, %message, "call panicked");
                ResponseDatagram::error(RemoteError::raised("panic", message))
            }
        }
    }

    fn encode(&self, response: ResponseDatagram) -> Vec<u8> {
        match self.protocol.marshal_response(&response) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, "response not encodable");
                let fallback = ResponseDatagram::error(RemoteError::raised(
                    "EncodeError",
                    format!("response could not be encoded: {}", e),
                ));
                self.protocol.marshal_response(&fallback).unwrap_or_default()
            }
        }
    }
}

fn check_arguments(types: &[ValueType], arguments: &[Value]) -> Result<(), RemoteError> {
    if types.len() != arguments.len() {
        return Err(RemoteError::new(
            FailureReason::ArgumentMismatch,
            format!("{} parameter types but {} arguments", types.len(), arguments.len()),
        ));
    }
    for (index, (ty, arg)) in types.iter().zip(arguments).enumerate() {
        if !arg.conforms_to(ty) {
            return Err(RemoteError::new(
                FailureReason::ArgumentMismatch,
                format!("argument {} is {}, declared {}", index, arg.kind(), ty),
            ));
        }
    }
    Ok(())
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "opaque panic payload".to_string()
    }
}
