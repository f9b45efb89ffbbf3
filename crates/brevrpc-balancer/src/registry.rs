//! Service discovery seam.
//!
//! The runtime only consumes a registry: it looks up candidate endpoints per
//! service key and reacts to change notifications by dropping cached
//! selection state. [`InMemoryRegistry`] is a process-local implementation
//! used for static endpoint lists and tests.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use brevrpc_common::protocol::error::{Result, RpcError};
use tracing::{debug, info};

use crate::endpoint::Endpoint;

/// Called with the service key whose endpoint list changed.
pub type ChangeListener = Arc<dyn Fn(&str) + Send + Sync>;

#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    async fn register(&self, endpoint: &Endpoint) -> Result<()>;

    async fn unregister(&self, endpoint: &Endpoint) -> Result<()>;

    /// Current endpoints for `service_key`; an unknown key yields an empty list.
    async fn lookup(&self, service_key: &str) -> Result<Vec<Endpoint>>;

    /// Subscribes to changes of `service_key`'s endpoint list.
    async fn watch(&self, service_key: &str, on_change: ChangeListener) -> Result<()>;
}

#[derive(Default)]
struct ServiceEntry {
    endpoints: Vec<Endpoint>,
    listeners: Vec<ChangeListener>,
}

/// Registry kept in process memory.
///
/// # Example
///
/// ```
/// use brevrpc_balancer::{Endpoint, InMemoryRegistry, ServiceRegistry};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let registry = InMemoryRegistry::new();
/// registry.register(&Endpoint::new("Foo", "1.0.0", "127.0.0.1", 2526)).await.unwrap();
///
/// let found = registry.lookup("Foo#1.0.0").await.unwrap();
/// assert_eq!(found.len(), 1);
/// # }
/// ```
#[derive(Default)]
pub struct InMemoryRegistry {
    services: RwLock<HashMap<String, ServiceEntry>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry pre-filled with `endpoints`.
    pub fn with_endpoints(endpoints: impl IntoIterator<Item = Endpoint>) -> Self {
        let registry = Self::new();
        {
            let mut services = registry.services.write().unwrap_or_else(PoisonError::into_inner);
            for endpoint in endpoints {
                let entry = services.entry(endpoint.service_key()).or_default();
                entry.endpoints.retain(|e| e.key() != endpoint.key());
                entry.endpoints.push(endpoint);
            }
        }
        registry
    }

    /// Applies `change` to the entry of `service_key` and notifies its
    /// listeners outside the lock.
    fn update<F>(&self, service_key: &str, change: F)
    where
        F: FnOnce(&mut Vec<Endpoint>) -> bool,
    {
        let listeners = {
            let mut services = self.services.write().unwrap_or_else(PoisonError::into_inner);
            let entry = services.entry(service_key.to_string()).or_default();
            if !change(&mut entry.endpoints) {
                return;
            }
            entry.listeners.clone()
        };

        debug!("Endpoints of {} changed, notifying {} listeners", service_key, listeners.len());
        for listener in listeners {
            listener(service_key);
        }
    }
}

#[async_trait]
impl ServiceRegistry for InMemoryRegistry {
    async fn register(&self, endpoint: &Endpoint) -> Result<()> {
        if endpoint.address.is_empty() {
            return Err(RpcError::Registry(format!(
                "endpoint for {} has no address",
                endpoint.service_key()
            )));
        }
        info!("Registering {}", endpoint);
        let endpoint = endpoint.clone();
        self.update(&endpoint.service_key(), |endpoints| {
            endpoints.retain(|e| e.key() != endpoint.key());
            endpoints.push(endpoint.clone());
            true
        });
        Ok(())
    }

    async fn unregister(&self, endpoint: &Endpoint) -> Result<()> {
        info!("Unregistering {}", endpoint);
        self.update(&endpoint.service_key(), |endpoints| {
            let before = endpoints.len();
            endpoints.retain(|e| e.key() != endpoint.key());
            endpoints.len() != before
        });
        Ok(())
    }

    async fn lookup(&self, service_key: &str) -> Result<Vec<Endpoint>> {
        let services = self.services.read().unwrap_or_else(PoisonError::into_inner);
        Ok(services
            .get(service_key)
            .map(|entry| entry.endpoints.clone())
            .unwrap_or_default())
    }

    async fn watch(&self, service_key: &str, on_change: ChangeListener) -> Result<()> {
        let mut services = self.services.write().unwrap_or_else(PoisonError::into_inner);
        services
            .entry(service_key.to_string())
            .or_default()
            .listeners
            .push(on_change);
        Ok(())
    }
}
