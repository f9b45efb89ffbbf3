//! Service hosting.
//!
//! A [`Service`] is one interface at one version, holding a handler per
//! method signature. Handlers are typed closures; argument decoding and
//! result encoding happen here with the codec of the inbound frame.
//!
//! # Example
//!
//! ```
//! use brevrpc_server::{ServiceBuilder, ServiceCatalog};
//!
//! let hello = ServiceBuilder::new("HelloFacade", "1.0.0")
//!     .method("hello_rpc", &["String"], |(name,): (String,)| {
//!         Ok(format!("HelloFacade: {}", name))
//!     })
//!     .build();
//!
//! let mut catalog = ServiceCatalog::new();
//! catalog.add(hello);
//! assert!(catalog.get("HelloFacade#1.0.0").is_some());
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use brevrpc_common::protocol::{method_signature, service_key, Request, Response};
use brevrpc_common::transport::Codec;

type Handler = Arc<dyn Fn(&Codec, &[u8]) -> Result<Vec<u8>, String> + Send + Sync>;

/// Collects the methods of one service.
pub struct ServiceBuilder {
    interface: String,
    version: String,
    methods: HashMap<String, Handler>,
}

impl ServiceBuilder {
    pub fn new(interface: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            version: version.into(),
            methods: HashMap::new(),
        }
    }

    /// Registers `handler` under `name(param_types...)`.
    ///
    /// `A` is the argument tuple the caller encodes, e.g. `(String,)`. An
    /// `Err` from the handler becomes the message of a FAIL response.
    pub fn method<A, R, F>(mut self, name: &str, param_types: &[&str], handler: F) -> Self
    where
        A: DeserializeOwned,
        R: Serialize,
        F: Fn(A) -> Result<R, String> + Send + Sync + 'static,
    {
        let signature = method_signature(name, param_types);
        let handler: Handler = Arc::new(move |codec: &Codec, args: &[u8]| {
            let args: A = codec.decode(args).map_err(|e| format!("bad arguments: {}", e))?;
            let result = handler(args)?;
            codec.encode(&result).map_err(|e| e.to_string())
        });
        if self.methods.insert(signature.clone(), handler).is_some() {
            warn!("Method {} of {} registered twice, keeping the last", signature, self.interface);
        }
        self
    }

    pub fn build(self) -> Service {
        Service {
            interface: self.interface,
            version: self.version,
            methods: self.methods,
        }
    }
}

pub struct Service {
    interface: String,
    version: String,
    methods: HashMap<String, Handler>,
}

impl Service {
    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn service_key(&self) -> String {
        service_key(&self.interface, &self.version)
    }

    /// Registered method signatures, unordered.
    pub fn signatures(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    fn invoke(&self, signature: &str, codec: &Codec, args: &[u8]) -> Response {
        let Some(handler) = self.methods.get(signature) else {
            return Response::error(format!("method not exist: {}", signature));
        };

        match panic::catch_unwind(AssertUnwindSafe(|| handler(codec, args))) {
            Ok(Ok(result)) => Response::success(result),
            Ok(Err(message)) => Response::error(message),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!("Handler {} of {} panicked: {}", signature, self.service_key(), message);
                Response::error(format!("handler panicked: {}", message))
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Services hosted by one server, keyed by `interface#version`.
#[derive(Default, Clone)]
pub struct ServiceCatalog {
    services: HashMap<String, Arc<Service>>,
}

impl ServiceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a service, replacing any earlier one with the same key.
    pub fn add(&mut self, service: Service) {
        self.services.insert(service.service_key(), Arc::new(service));
    }

    pub fn get(&self, service_key: &str) -> Option<&Arc<Service>> {
        self.services.get(service_key)
    }

    pub fn services(&self) -> impl Iterator<Item = &Arc<Service>> {
        self.services.values()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Runs `request` against its handler. Never fails: lookup misses,
    /// handler errors and panics all come back as failed responses.
    pub fn dispatch(&self, request: &Request, codec: &Codec) -> Response {
        let key = request.service_key();
        match self.services.get(&key) {
            Some(service) => service.invoke(&request.signature(), codec, &request.args),
            None => Response::error(format!("service not exist: {}", key)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brevrpc_common::transport::SerializationType;

    fn catalog() -> ServiceCatalog {
        let service = ServiceBuilder::new("Calc", "1.0.0")
            .method("add", &["i64", "i64"], |(a, b): (i64, i64)| Ok(a + b))
            .method("div", &["i64", "i64"], |(a, b): (i64, i64)| {
                if b == 0 {
                    Err("division by zero".to_string())
                } else {
                    Ok(a / b)
                }
            })
            .method("explode", &[], |(): ()| -> Result<(), String> { panic!("kaboom") })
            .build();
        let mut catalog = ServiceCatalog::new();
        catalog.add(service);
        catalog
    }

    fn request<A: Serialize>(method: &str, params: &[&str], args: &A, codec: &Codec) -> Request {
        Request::new("Calc", method, "1.0.0")
            .with_param_types(params.iter().copied())
            .with_args(codec.encode(args).unwrap())
    }

    #[test]
    fn test_dispatch_success() {
        let codec = SerializationType::Postcard.codec();
        let response = catalog().dispatch(&request("add", &["i64", "i64"], &(2i64, 40i64), codec), codec);
        assert!(response.is_success());
        let sum: i64 = codec.decode(&response.result.unwrap()).unwrap();
        assert_eq!(sum, 42);
    }

    #[test]
    fn test_handler_error_is_failed_response() {
        let codec = SerializationType::Json.codec();
        let response = catalog().dispatch(&request("div", &["i64", "i64"], &(1i64, 0i64), codec), codec);
        assert_eq!(response.error.as_deref(), Some("division by zero"));
    }

    #[test]
    fn test_unknown_service_and_method() {
        let codec = SerializationType::Postcard.codec();
        let catalog = catalog();

        let missing = Request::new("Nope", "add", "1.0.0");
        assert_eq!(
            catalog.dispatch(&missing, codec).error.as_deref(),
            Some("service not exist: Nope#1.0.0")
        );

        let wrong_arity = request("add", &["i64"], &(1i64,), codec);
        assert_eq!(
            catalog.dispatch(&wrong_arity, codec).error.as_deref(),
            Some("method not exist: add(i64)")
        );
    }

    #[test]
    fn test_panicking_handler_is_contained() {
        let codec = SerializationType::Postcard.codec();
        let response = catalog().dispatch(&request("explode", &[], &(), codec), codec);
        assert_eq!(response.error.as_deref(), Some("handler panicked: kaboom"));
    }

    #[test]
    fn test_undecodable_arguments() {
        let codec = SerializationType::Json.codec();
        let req = Request::new("Calc", "add", "1.0.0")
            .with_param_types(["i64", "i64"])
            .with_args(b"not json".to_vec());
        let response = catalog().dispatch(&req, codec);
        assert!(response.error.unwrap().starts_with("bad arguments"));
    }
}
