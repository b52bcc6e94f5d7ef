//! # Typed Service Definitions
//!
//! `service!` turns one trait declaration into the three pieces a typed
//! service needs:
//!
//! - the async trait itself, with every method returning `Result<_, CallError>`;
//! - a client implementing the trait by forwarding each call through a `Proxy`;
//! - a server adapter exposing any implementation of the trait as `Dispatch`.
//!
//! ```ignore
//! loderun::service! {
//!     /// Repeats what it hears.
//!     pub trait Echo: "demo.Echo" {
//!         fn echo(text: String) -> String;
//!     }
//!     pub client EchoClient;
//!     pub server EchoServer;
//! }
//! ```
//!
//! The server adapter matches on method name and the `Wire` types of the
//! parameters. Services with overloaded method names implement `Dispatch` by
//! hand. Debug and Display on a client are answered locally and never reach
//! a provider.

use lodepack::Value;
use lodepack::ValueType;
use lodepack::Wire;
use loderpc::FailureReason;
use loderpc::RemoteError;

#[doc(hidden)]
pub fn argument<T: Wire>(value: Option<Value>, name: &str) -> Result<T, RemoteError> {
    let value = value.ok_or_else(|| {
        RemoteError::new(FailureReason::ArgumentMismatch, format!("missing argument '{}'", name))
    })?;
    T::from_value(value).map_err(|e| {
        RemoteError::new(FailureReason::ArgumentMismatch, format!("argument '{}': {}", name, e))
    })
}

#[doc(hidden)]
pub fn no_method(interface: &str, method: &str, types: &[ValueType]) -> RemoteError {
    let types: Vec<String> = types.iter().map(ToString::to_string).collect();
    RemoteError::new(
        FailureReason::MethodNotFound,
        format!("{} has no method {}({})", interface, method, types.join(", ")),
    )
}

#[macro_export]
macro_rules! service {
    (
        $(#[$meta:meta])*
        $vis:vis trait $name:ident : $iface:literal {
            $(
                $(#[$mmeta:meta])*
                fn $method:ident ( $( $arg:ident : $ty:ty ),* $(,)? ) -> $ret:ty ;
            )*
        }
        $cvis:vis client $client:ident ;
        $svis:vis server $server:ident ;
    ) => {
        $(#[$meta])*
        #[$crate::async_trait]
        $vis trait $name: Send + Sync + 'static {
            $(
                $(#[$mmeta])*
                async fn $method(&self $(, $arg: $ty)*)
                    -> ::std::result::Result<$ret, $crate::proxy::CallError>;
            )*
        }

        #[derive(Clone)]
        $cvis struct $client {
            proxy: $crate::proxy::Proxy,
        }

        impl $client {
            pub fn proxy(&self) -> &$crate::proxy::Proxy {
                &self.proxy
            }
        }

        impl $crate::proxy::RemoteStub for $client {
            const INTERFACE: &'static str = $iface;

            fn from_proxy(proxy: $crate::proxy::Proxy) -> Self {
                Self { proxy }
            }
        }

        impl ::std::fmt::Debug for $client {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, "{}({})", stringify!($client), $iface)
            }
        }

        impl ::std::fmt::Display for $client {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, "remote {}", $iface)
            }
        }

        #[$crate::async_trait]
        impl $name for $client {
            $(
                async fn $method(&self $(, $arg: $ty)*)
                    -> ::std::result::Result<$ret, $crate::proxy::CallError>
                {
                    let value = self
                        .proxy
                        .invoke(
                            stringify!($method),
                            vec![$(<$ty as $crate::lodepack::Wire>::value_type()),*],
                            vec![$($crate::lodepack::Wire::into_value($arg)),*],
                        )
                        .await?;
                    Ok(<$ret as $crate::lodepack::Wire>::from_value(value)?)
                }
            )*
        }

        $svis struct $server<T>(::std::sync::Arc<T>);

        impl<T: $name> $server<T> {
            pub fn new(inner: T) -> Self {
                Self(::std::sync::Arc::new(inner))
            }

            pub fn from_arc(inner: ::std::sync::Arc<T>) -> Self {
                Self(inner)
            }
        }

        #[$crate::async_trait]
        impl<T: $name> $crate::dispatch::Dispatch for $server<T> {
            fn interface(&self) -> &str {
                $iface
            }

            async fn invoke(
                &self,
                method: &str,
                parameter_types: &[$crate::lodepack::ValueType],
                arguments: ::std::vec::Vec<$crate::lodepack::Value>,
            ) -> ::std::result::Result<$crate::lodepack::Value, $crate::loderpc::RemoteError> {
                $(
                    {
                        let expected: &[$crate::lodepack::ValueType] =
                            &[$(<$ty as $crate::lodepack::Wire>::value_type()),*];
                        if method == stringify!($method) && parameter_types == expected {
                            #[allow(unused_mut, unused_variables)]
                            let mut arguments = arguments.into_iter();
                            $(
                                let $arg: $ty = $crate::service::argument(arguments.next(), stringify!($arg))?;
                            )*
                            let result = self
                                .0
                                .$method($($arg),*)
                                .await
                                .map_err($crate::proxy::CallError::into_remote)?;
                            return Ok($crate::lodepack::Wire::into_value(result));
                        }
                    }
                )*
                Err($crate::service::no_method($iface, method, parameter_types))
            }
        }
    };
}
