use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use brevrpc_balancer::{EndpointSelector, ServiceRegistry};
use brevrpc_common::protocol::error::{Result, RpcError};
use brevrpc_common::protocol::{method_signature, service_key, Request};
use brevrpc_common::transport::{Envelope, Message};

use crate::config::ClientConfig;
use crate::connector::{Connector, TcpConnector};
use crate::correlation::CallOutcome;
use crate::registry::ConnectionRegistry;

/// Names one method of one service version, plus per-call options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallDescriptor {
    pub interface: String,
    pub method: String,
    pub version: String,
    pub param_types: Vec<String>,
    /// Overrides [`ClientConfig::call_timeout`].
    pub timeout: Option<Duration>,
    /// Routing identity for consistent hashing. Defaults to the service key,
    /// method signature and encoded arguments.
    pub hash_key: Option<String>,
}

impl CallDescriptor {
    pub fn new(interface: impl Into<String>, method: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            method: method.into(),
            version: version.into(),
            param_types: Vec::new(),
            timeout: None,
            hash_key: None,
        }
    }

    pub fn with_param_types<S: Into<String>>(mut self, param_types: impl IntoIterator<Item = S>) -> Self {
        self.param_types = param_types.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_hash_key(mut self, hash_key: impl Into<String>) -> Self {
        self.hash_key = Some(hash_key.into());
        self
    }

    pub fn service_key(&self) -> String {
        service_key(&self.interface, &self.version)
    }

    pub fn signature(&self) -> String {
        method_signature(&self.method, &self.param_types)
    }
}

/// Asynchronous RPC client.
///
/// Resolves endpoints through a [`ServiceRegistry`], picks one with the
/// configured load balancer, and multiplexes calls over one long-lived
/// connection per endpoint.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use brevrpc_balancer::InMemoryRegistry;
/// use brevrpc_client::{CallDescriptor, ClientConfig, RpcClient};
///
/// # async fn example() -> brevrpc_common::Result<()> {
/// let registry = Arc::new(InMemoryRegistry::new());
/// let client = RpcClient::with_tcp(ClientConfig::default(), registry);
///
/// let call = CallDescriptor::new("HelloFacade", "hello_rpc", "1.0.0").with_param_types(["String"]);
/// let greeting: String = client.invoke(&call, &("world".to_string(),)).await?;
/// # Ok(())
/// # }
/// ```
pub struct RpcClient {
    config: ClientConfig,
    registry: Arc<dyn ServiceRegistry>,
    connections: ConnectionRegistry,
    selector: EndpointSelector,
    watched: DashSet<String>,
}

impl RpcClient {
    /// Must be called from within a Tokio runtime.
    pub fn new(config: ClientConfig, registry: Arc<dyn ServiceRegistry>, connector: Arc<dyn Connector>) -> Self {
        let connections = ConnectionRegistry::new(connector, &config);
        let selector = EndpointSelector::new(config.load_balancer);
        Self {
            config,
            registry,
            connections,
            selector,
            watched: DashSet::new(),
        }
    }

    pub fn with_tcp(config: ClientConfig, registry: Arc<dyn ServiceRegistry>) -> Self {
        Self::new(config, registry, Arc::new(TcpConnector))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    /// Calls a remote method with typed arguments and result.
    ///
    /// `args` is the argument tuple, e.g. `&(name,)` or `&(name, address)`.
    pub async fn invoke<A, R>(&self, call: &CallDescriptor, args: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let codec = self.config.serialization.codec();
        let result = self.invoke_raw(call, codec.encode(args)?).await?;
        codec.decode(&result)
    }

    /// Calls a remote method with pre-encoded arguments and returns the
    /// encoded result.
    pub async fn invoke_raw(&self, call: &CallDescriptor, args: Vec<u8>) -> Result<Vec<u8>> {
        let service_key = call.service_key();
        self.ensure_watch(&service_key).await;

        let candidates = self.registry.lookup(&service_key).await.map_err(|e| match e {
            RpcError::Registry(_) => e,
            other => RpcError::Registry(other.to_string()),
        })?;
        let candidates = self.connections.filter_healthy(candidates);
        let identity = match &call.hash_key {
            Some(hash_key) => hash_key.clone(),
            None => request_identity(&service_key, &call.signature(), &args),
        };
        let endpoint = self
            .selector
            .select(&service_key, &candidates, &identity)
            .ok_or_else(|| RpcError::ServiceNotFound(service_key.clone()))?;

        let connection = self.connections.get_or_connect(&endpoint).await?;
        let ctx = self.connections.context();

        let request_id = ctx.ids.next_id();
        let request = Request::new(&call.interface, &call.method, &call.version)
            .with_param_types(call.param_types.iter().cloned())
            .with_args(args);
        let frame = Envelope::new(request_id, self.config.serialization, Message::Request(request)).encode()?;

        let rx = ctx.calls.register(request_id, connection.id());
        if let Err(e) = connection.send(frame).await {
            ctx.calls.fail(request_id, RpcError::CallFailure(e.to_string()));
            return Err(e);
        }
        debug!("Sent request {} for {} to {}", request_id, call.signature(), endpoint.key());

        let timeout = call.timeout.unwrap_or(self.config.call_timeout);
        match ctx.calls.wait(request_id, rx, timeout).await {
            CallOutcome::Success(response) => match response.error {
                None => Ok(response.result.unwrap_or_default()),
                Some(message) => Err(RpcError::Invoke(message)),
            },
            CallOutcome::Timeout => Err(RpcError::Timeout(timeout.as_millis() as u64)),
            CallOutcome::Failed(e) => Err(e),
        }
    }

    /// Subscribes once per service key so registry changes invalidate the
    /// load balancer's cached state.
    async fn ensure_watch(&self, service_key: &str) {
        if !self.watched.insert(service_key.to_string()) {
            return;
        }
        let selector = self.selector.clone();
        let listener = Arc::new(move |changed: &str| selector.invalidate(changed));
        if let Err(e) = self.registry.watch(service_key, listener).await {
            warn!("Failed to watch {}: {}", service_key, e);
            self.watched.remove(service_key);
        }
    }

    /// Closes every connection; in-flight calls fail.
    pub fn shutdown(&self) {
        self.connections.shutdown();
    }
}

fn request_identity(service_key: &str, signature: &str, args: &[u8]) -> String {
    let mut identity = String::with_capacity(service_key.len() + signature.len() + args.len() * 2);
    identity.push_str(service_key);
    identity.push_str(signature);
    for byte in args {
        let _ = write!(identity, "{:02x}", byte);
    }
    identity
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_keys() {
        let call = CallDescriptor::new("HelloFacade", "hello_rpc", "1.0.0").with_param_types(["String", "String"]);
        assert_eq!(call.service_key(), "HelloFacade#1.0.0");
        assert_eq!(call.signature(), "hello_rpc(String,String)");
    }

    #[test]
    fn test_request_identity_includes_args() {
        let a = request_identity("S#1", "m()", &[0x01, 0xab]);
        let b = request_identity("S#1", "m()", &[0x01, 0xac]);
        assert_eq!(a, "S#1m()01ab");
        assert_ne!(a, b);
    }
}
