use async_trait::async_trait;
use brevrpc_common::protocol::error::{Result, RpcError};
use brevrpc_common::transport::BoxedStream;
use tokio::net::TcpStream;
use tracing::debug;

/// Opens byte streams to remote endpoints.
///
/// The registry dials through this seam so tests can substitute in-memory
/// transports.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, addr: &str) -> Result<BoxedStream>;
}

/// Dials plain TCP with Nagle disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, addr: &str) -> Result<BoxedStream> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| RpcError::connect(addr, e))?;
        stream
            .set_nodelay(true)
            .map_err(|e| RpcError::connect(addr, e))?;
        debug!("Connected to {}", addr);
        Ok(Box::new(stream))
    }
}
