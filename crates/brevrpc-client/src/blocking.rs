use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::runtime::{Builder, Runtime};
use tracing::info;

use brevrpc_balancer::ServiceRegistry;
use brevrpc_common::protocol::error::Result;

use crate::client::{CallDescriptor, RpcClient};
use crate::config::ClientConfig;
use crate::connector::{Connector, TcpConnector};

/// Synchronous facade over [`RpcClient`].
///
/// Owns a multi-threaded runtime with `io_threads` workers that drives all
/// connection I/O; calls block the current thread until they resolve. Must
/// not be used from inside another Tokio runtime.
pub struct BlockingClient {
    client: RpcClient,
    runtime: Runtime,
}

impl BlockingClient {
    pub fn new(config: ClientConfig, registry: Arc<dyn ServiceRegistry>, connector: Arc<dyn Connector>) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(config.io_threads.max(1))
            .thread_name("brevrpc-io")
            .enable_all()
            .build()?;
        let client = {
            let _guard = runtime.enter();
            RpcClient::new(config, registry, connector)
        };
        info!("Blocking client started with {} I/O threads", client.config().io_threads);
        Ok(Self { client, runtime })
    }

    pub fn with_tcp(config: ClientConfig, registry: Arc<dyn ServiceRegistry>) -> Result<Self> {
        Self::new(config, registry, Arc::new(TcpConnector))
    }

    pub fn invoke<A, R>(&self, call: &CallDescriptor, args: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.runtime.block_on(self.client.invoke(call, args))
    }

    pub fn invoke_raw(&self, call: &CallDescriptor, args: Vec<u8>) -> Result<Vec<u8>> {
        self.runtime.block_on(self.client.invoke_raw(call, args))
    }

    pub fn client(&self) -> &RpcClient {
        &self.client
    }

    /// Closes all connections and stops the I/O threads.
    pub fn shutdown(self) {
        self.client.shutdown();
        let Self { client, runtime } = self;
        {
            let _guard = runtime.enter();
            drop(client);
        }
        runtime.shutdown_background();
    }
}
