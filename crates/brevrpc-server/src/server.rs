//! TCP server and per-connection inbound pipeline.
//!
//! Each accepted connection gets one reader task and one writer task on the
//! I/O runtime. The reader decodes frames, answers heartbeats in place and
//! hands requests to the [`WorkerPool`]; workers push encoded responses back
//! through the writer's channel.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use brevrpc_balancer::{now_millis, Endpoint, ServiceRegistry};
use brevrpc_common::protocol::error::{Result, RpcError};
use brevrpc_common::protocol::{MsgType, RequestId, Response};
use brevrpc_common::transport::{heartbeat_pong, Envelope, Frame, FrameDecoder, Message, SerializationType};

use crate::config::ServerConfig;
use crate::dispatcher::WorkerPool;
use crate::service::ServiceCatalog;

/// Frames queued for one connection's writer.
const WRITE_QUEUE: usize = 1024;

/// Serves inbound connections against a [`ServiceCatalog`].
///
/// Transport agnostic: [`RpcServer`] feeds it TCP streams, tests can feed it
/// in-memory ones.
pub struct ConnectionHandler {
    catalog: Arc<ServiceCatalog>,
    pool: WorkerPool,
    config: ServerConfig,
    local_addr: String,
}

impl ConnectionHandler {
    pub fn new(config: ServerConfig, catalog: ServiceCatalog, local_addr: impl Into<String>) -> Self {
        Self {
            catalog: Arc::new(catalog),
            pool: WorkerPool::new(config.worker_max, config.queue_depth),
            config,
            local_addr: local_addr.into(),
        }
    }

    pub fn catalog(&self) -> &ServiceCatalog {
        &self.catalog
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Runs one connection until the peer hangs up, it idles past
    /// `idle_timeout`, or it sends something unparseable.
    pub async fn serve_connection<S>(&self, stream: S, peer: String)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let (tx, mut rx) = mpsc::channel::<Bytes>(WRITE_QUEUE);

        let writer_peer = peer.clone();
        let writer_task = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Err(e) = writer.write_all(&frame).await {
                    warn!("Write to {} failed: {}", writer_peer, e);
                    break;
                }
            }
            let _ = writer.shutdown().await;
        });

        let mut decoder = FrameDecoder::new();
        'conn: loop {
            loop {
                match decoder.decode() {
                    Ok(Some(frame)) => {
                        if let Err(e) = self.handle_frame(frame, &tx).await {
                            if e.is_fatal_for_connection() {
                                warn!("Closing connection from {}: {}", peer, e);
                                break 'conn;
                            }
                            debug!("Dropping frame from {}: {}", peer, e);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Closing connection from {}: {}", peer, e);
                        break 'conn;
                    }
                }
            }

            match tokio::time::timeout(self.config.idle_timeout, decoder.read_from(&mut reader)).await {
                Err(_) => {
                    info!(
                        "Closing connection from {} after {}s idle",
                        peer,
                        self.config.idle_timeout.as_secs()
                    );
                    break;
                }
                Ok(Ok(0)) => {
                    debug!("Connection from {} closed by peer", peer);
                    break;
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    debug!("Read from {} failed: {}", peer, e);
                    break;
                }
            }
        }

        // Workers still holding a sender finish their replies first.
        drop(tx);
        if let Err(e) = writer_task.await {
            error!("Writer task for {} failed: {}", peer, e);
        }
    }

    async fn handle_frame(&self, frame: Frame, tx: &mpsc::Sender<Bytes>) -> Result<()> {
        match frame.msg_type() {
            Some(MsgType::HeartbeatPing) => {
                let pong = heartbeat_pong(&frame.header, &self.local_addr)?;
                send(tx, pong).await
            }
            Some(MsgType::Request) => self.handle_request(frame, tx).await,
            other => {
                debug!("Ignoring {:?} frame {}", other, frame.request_id());
                Ok(())
            }
        }
    }

    async fn handle_request(&self, frame: Frame, tx: &mpsc::Sender<Bytes>) -> Result<()> {
        let request_id = frame.request_id();
        let serialization = SerializationType::try_from(frame.header.serialization)?;

        let request = match Envelope::decode(&frame) {
            Ok(Envelope {
                message: Message::Request(request),
                ..
            }) => request,
            Ok(_) => return Ok(()),
            Err(e) => {
                warn!("Undecodable request {}: {}", request_id, e);
                let reply = encode_response(request_id, serialization, Response::error(format!("bad request: {}", e)))?;
                return send(tx, reply).await;
            }
        };

        let catalog = Arc::clone(&self.catalog);
        let reply_tx = tx.clone();
        let submitted = self.pool.submit(move || {
            let response = catalog.dispatch(&request, serialization.codec());
            let reply = encode_response(request_id, serialization, response).or_else(|e| {
                error!("Failed to encode response {}: {}", request_id, e);
                encode_response(request_id, serialization, Response::error(e.to_string()))
            });
            match reply {
                Ok(reply) => {
                    if reply_tx.blocking_send(reply).is_err() {
                        debug!("Connection gone before response {} was sent", request_id);
                    }
                }
                Err(e) => error!("Dropping response {}: {}", request_id, e),
            }
        });

        if let Err(e) = submitted {
            let message = match e {
                RpcError::CallFailure(message) => message,
                other => other.to_string(),
            };
            let reply = encode_response(request_id, serialization, Response::error(message))?;
            send(tx, reply).await?;
        }
        Ok(())
    }
}

fn encode_response(request_id: RequestId, serialization: SerializationType, response: Response) -> Result<Bytes> {
    Envelope::new(request_id, serialization, Message::Response(response)).encode()
}

async fn send(tx: &mpsc::Sender<Bytes>, frame: Bytes) -> Result<()> {
    tx.send(frame)
        .await
        .map_err(|_| RpcError::CallFailure("connection writer closed".to_string()))
}

/// RPC server bound to a TCP port.
///
/// # Example
///
/// ```no_run
/// use brevrpc_server::{RpcServer, ServerConfig, ServiceBuilder, ServiceCatalog};
///
/// # async fn example() -> brevrpc_common::Result<()> {
/// let mut catalog = ServiceCatalog::new();
/// catalog.add(
///     ServiceBuilder::new("HelloFacade", "1.0.0")
///         .method("hello_rpc", &["String"], |(name,): (String,)| Ok(format!("HelloFacade: {}", name)))
///         .build(),
/// );
///
/// let server = RpcServer::bind(ServerConfig::default(), catalog).await?;
/// server.run_until(async { tokio::signal::ctrl_c().await.ok(); }).await?;
/// # Ok(())
/// # }
/// ```
pub struct RpcServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    handler: Arc<ConnectionHandler>,
    started_at_ms: u64,
}

impl RpcServer {
    pub async fn bind(config: ServerConfig, catalog: ServiceCatalog) -> Result<Self> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(|e| RpcError::connect(config.bind_addr.to_string(), e))?;
        let local_addr = listener.local_addr()?;
        let handler = ConnectionHandler::new(config, catalog, local_addr.to_string());
        info!("brevrpc server bound to {}", local_addr);

        Ok(Self {
            listener,
            local_addr,
            handler: Arc::new(handler),
            started_at_ms: now_millis(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn handler(&self) -> &Arc<ConnectionHandler> {
        &self.handler
    }

    /// One endpoint per hosted service, as advertised to a registry.
    pub fn endpoints(&self) -> Vec<Endpoint> {
        let config = &self.handler.config;
        let host = match &config.advertise_host {
            Some(host) => host.clone(),
            None if self.local_addr.ip().is_unspecified() => "127.0.0.1".to_string(),
            None => self.local_addr.ip().to_string(),
        };
        self.handler
            .catalog
            .services()
            .map(|service| {
                Endpoint::new(service.interface(), service.version(), host.clone(), self.local_addr.port())
                    .with_weight(config.advertise_weight)
                    .with_warmup(config.advertise_warmup)
                    .with_created_at(self.started_at_ms)
            })
            .collect()
    }

    pub async fn publish(&self, registry: &dyn ServiceRegistry) -> Result<()> {
        for endpoint in self.endpoints() {
            registry.register(&endpoint).await?;
            info!("Published {}", endpoint);
        }
        Ok(())
    }

    pub async fn unpublish(&self, registry: &dyn ServiceRegistry) -> Result<()> {
        for endpoint in self.endpoints() {
            registry.unregister(&endpoint).await?;
        }
        Ok(())
    }

    /// Serves until the task is cancelled.
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Serves until `signal` completes, then stops accepting, drops open
    /// connections and shuts the worker pool down.
    pub async fn run_until<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut connections = JoinSet::new();
        tokio::pin!(signal);

        info!("brevrpc server listening on {}", self.local_addr);
        loop {
            tokio::select! {
                _ = &mut signal => break,
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!("Accept failed: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
                    }
                    debug!("Accepted connection from {}", peer);
                    let handler = Arc::clone(&self.handler);
                    connections.spawn(async move {
                        handler.serve_connection(stream, peer.to_string()).await;
                    });
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        info!("brevrpc server on {} shutting down ({} open connections)", self.local_addr, connections.len());
        connections.shutdown().await;
        self.handler.pool.shutdown();
        Ok(())
    }
}
