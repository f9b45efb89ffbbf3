use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError, Weak};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use brevrpc_balancer::Endpoint;
use brevrpc_common::protocol::error::{Result, RpcError};

use crate::config::{ClientConfig, ReconnectPolicy};
use crate::connection::{Connection, ConnectionContext, ConnectionDriver, ConnectionEvent};
use crate::connector::Connector;
use crate::reconnect;

/// Registry record for one remote endpoint.
pub(crate) struct ConnectionEntry {
    pub connection: Arc<Connection>,
    /// Endpoint is unhealthy and being redialed; selection skips it.
    pub retry: bool,
    pub reconnect_attempts: u32,
}

/// Snapshot of an entry, for inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryState {
    pub connection_id: u64,
    pub open: bool,
    pub retry: bool,
    pub reconnect_attempts: u32,
}

pub(crate) struct RegistryInner {
    pub entries: DashMap<String, ConnectionEntry>,
    dial_locks: DashMap<String, Arc<Mutex<()>>>,
    connector: Arc<dyn Connector>,
    pub context: Arc<ConnectionContext>,
    pub reconnect: ReconnectPolicy,
    connect_timeout: Duration,
    next_connection_id: AtomicU64,
    shutting_down: AtomicBool,
}

impl RegistryInner {
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    pub fn dial_lock(&self, key: &str) -> Arc<Mutex<()>> {
        Arc::clone(self.dial_locks.entry(key.to_string()).or_default().value())
    }

    /// Drops the dial lock for `key` unless a caller still holds it.
    pub fn forget_dial_lock(&self, key: &str) {
        self.dial_locks.remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
    }

    fn healthy(&self, key: &str) -> Option<Arc<Connection>> {
        self.entries
            .get(key)
            .filter(|entry| !entry.retry && entry.connection.is_open())
            .map(|entry| Arc::clone(&entry.connection))
    }

    /// Opens a connection to `addr`. The reader is not started yet so the
    /// caller can record the connection before it can report a close.
    pub async fn dial(&self, key: &str, addr: &str) -> Result<(Arc<Connection>, ConnectionDriver)> {
        let stream = match tokio::time::timeout(self.connect_timeout, self.connector.connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(match e {
                    RpcError::Connect { .. } => e,
                    other => RpcError::connect(addr, other),
                })
            }
            Err(_) => {
                return Err(RpcError::connect(
                    addr,
                    format!("timed out after {}ms", self.connect_timeout.as_millis()),
                ))
            }
        };

        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        Ok(Connection::new(id, key, stream, Arc::clone(&self.context)))
    }

    fn handle_close(self: &Arc<Self>, event: ConnectionEvent) {
        if self.is_shutting_down() {
            return;
        }

        let retry = {
            let Some(mut entry) = self.entries.get_mut(&event.key) else {
                return;
            };
            if entry.connection.id() != event.connection_id {
                debug!("Ignoring close of replaced connection {} to {}", event.connection_id, event.key);
                return;
            }
            if event.retry {
                entry.retry = true;
            }
            event.retry
        };

        if retry {
            info!("Connection to {} lost, scheduling reconnect", event.key);
            tokio::spawn(reconnect::run(Arc::clone(self), event.key));
        } else {
            self.entries
                .remove_if(&event.key, |_, entry| entry.connection.id() == event.connection_id);
            self.forget_dial_lock(&event.key);
            info!("Connection to {} closed, removed from registry", event.key);
        }
    }
}

/// Table of live connections keyed by `address:port`.
///
/// Connections are opened on first use and reused while open. Dialing is
/// single-flight per destination: concurrent callers for the same endpoint
/// wait for one dial and share its connection.
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
    event_loop: StdMutex<Option<JoinHandle<()>>>,
}

impl ConnectionRegistry {
    /// Creates the registry and starts its close-event loop.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(connector: Arc<dyn Connector>, config: &ClientConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(RegistryInner {
            entries: DashMap::new(),
            dial_locks: DashMap::new(),
            connector,
            context: Arc::new(ConnectionContext::new(config, events_tx)),
            reconnect: config.reconnect.clone(),
            connect_timeout: config.connect_timeout,
            next_connection_id: AtomicU64::new(1),
            shutting_down: AtomicBool::new(false),
        });

        let event_loop = tokio::spawn(run_event_loop(Arc::downgrade(&inner), events_rx));

        Self {
            inner,
            event_loop: StdMutex::new(Some(event_loop)),
        }
    }

    pub(crate) fn context(&self) -> &Arc<ConnectionContext> {
        &self.inner.context
    }

    /// Returns the open connection to `endpoint`, dialing it if needed.
    ///
    /// A closed cached connection is evicted before the fresh dial.
    pub async fn get_or_connect(&self, endpoint: &Endpoint) -> Result<Arc<Connection>> {
        let key = endpoint.key();
        if let Some(connection) = self.inner.healthy(&key) {
            return Ok(connection);
        }

        let lock = self.inner.dial_lock(&key);
        let guard = lock.lock().await;

        if let Some(connection) = self.inner.healthy(&key) {
            return Ok(connection);
        }
        if let Some((_, stale)) = self.inner.entries.remove(&key) {
            debug!("Evicting closed connection {} to {}", stale.connection.id(), key);
            stale.connection.close();
        }

        let (connection, driver) = match self.inner.dial(&key, &key).await {
            Ok(dialed) => dialed,
            Err(e) => {
                drop(guard);
                drop(lock);
                self.inner.forget_dial_lock(&key);
                return Err(e);
            }
        };
        self.inner.entries.insert(
            key.clone(),
            ConnectionEntry {
                connection: Arc::clone(&connection),
                retry: false,
                reconnect_attempts: 0,
            },
        );
        driver.start();
        info!("Connected to {} (connection {})", key, connection.id());
        Ok(connection)
    }

    /// Drops candidates whose endpoint is currently being redialed.
    pub fn filter_healthy(&self, candidates: Vec<Endpoint>) -> Vec<Endpoint> {
        candidates
            .into_iter()
            .filter(|endpoint| {
                self.inner
                    .entries
                    .get(&endpoint.key())
                    .map_or(true, |entry| !entry.retry)
            })
            .collect()
    }

    pub fn entry_state(&self, key: &str) -> Option<EntryState> {
        self.inner.entries.get(key).map(|entry| EntryState {
            connection_id: entry.connection.id(),
            open: entry.connection.is_open(),
            retry: entry.retry,
            reconnect_attempts: entry.reconnect_attempts,
        })
    }

    /// Calls still waiting for a response, over every connection.
    pub fn pending_calls(&self) -> usize {
        self.inner.context.calls.len()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Closes every connection and stops reconnecting. In-flight calls fail.
    pub fn shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self
            .event_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }

        let keys: Vec<String> = self.inner.entries.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((_, entry)) = self.inner.entries.remove(&key) {
                entry.connection.close();
            }
        }
        let failed = self.inner.context.calls.fail_all("client shut down");
        info!("Connection registry shut down ({} calls failed)", failed);
    }
}

impl Drop for ConnectionRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_event_loop(inner: Weak<RegistryInner>, mut events: mpsc::UnboundedReceiver<ConnectionEvent>) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.handle_close(event);
    }
    warn!("Connection event loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HeartbeatConfig;
    use async_trait::async_trait;
    use brevrpc_common::transport::BoxedStream;
    use std::sync::atomic::AtomicUsize;
    use tokio::io::DuplexStream;

    /// Hands out in-memory streams, keeping the far ends alive.
    struct DuplexConnector {
        dials: AtomicUsize,
        delay: Duration,
        peers: StdMutex<Vec<DuplexStream>>,
    }

    impl DuplexConnector {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                dials: AtomicUsize::new(0),
                delay,
                peers: StdMutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Connector for DuplexConnector {
        async fn connect(&self, _addr: &str) -> Result<BoxedStream> {
            self.dials.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            let (local, remote) = tokio::io::duplex(4096);
            self.peers.lock().unwrap().push(remote);
            Ok(Box::new(local))
        }
    }

    struct RefusingConnector;

    #[async_trait]
    impl Connector for RefusingConnector {
        async fn connect(&self, addr: &str) -> Result<BoxedStream> {
            Err(RpcError::connect(addr, "connection refused"))
        }
    }

    fn endpoint(port: u16) -> Endpoint {
        Endpoint::new("Foo", "1.0.0", "10.0.0.9", port)
    }

    fn config() -> ClientConfig {
        ClientConfig::default().with_heartbeat(HeartbeatConfig {
            interval: Duration::from_secs(3600),
            timeout: Duration::from_secs(1),
            max_missed: 5,
        })
    }

    #[tokio::test]
    async fn test_connection_is_reused() {
        let connector = DuplexConnector::new(Duration::ZERO);
        let registry = ConnectionRegistry::new(connector.clone(), &config());

        let first = registry.get_or_connect(&endpoint(1)).await.unwrap();
        let second = registry.get_or_connect(&endpoint(1)).await.unwrap();
        assert_eq!(first.id(), second.id());
        assert_eq!(connector.dials.load(Ordering::SeqCst), 1);

        registry.get_or_connect(&endpoint(2)).await.unwrap();
        assert_eq!(connector.dials.load(Ordering::SeqCst), 2);
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_dials_are_single_flight() {
        let connector = DuplexConnector::new(Duration::from_millis(50));
        let registry = Arc::new(ConnectionRegistry::new(connector.clone(), &config()));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.get_or_connect(&endpoint(7)).await.unwrap().id() })
            })
            .collect();

        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap());
        }
        assert_eq!(connector.dials.load(Ordering::SeqCst), 1);
        assert!(ids.iter().all(|id| *id == ids[0]));
    }

    #[tokio::test]
    async fn test_closed_entry_is_evicted_and_redialed() {
        let connector = DuplexConnector::new(Duration::ZERO);
        let registry = ConnectionRegistry::new(connector.clone(), &config());

        let first = registry.get_or_connect(&endpoint(3)).await.unwrap();
        first.close();
        let second = registry.get_or_connect(&endpoint(3)).await.unwrap();

        assert_ne!(first.id(), second.id());
        assert!(second.is_open());
        assert_eq!(connector.dials.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dial_failure_is_connect_error() {
        let registry = ConnectionRegistry::new(Arc::new(RefusingConnector), &config());
        let err = registry.get_or_connect(&endpoint(4)).await.err().unwrap();
        assert!(matches!(err, RpcError::Connect { .. }));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_filter_healthy_skips_retrying_endpoints() {
        let connector = DuplexConnector::new(Duration::ZERO);
        let registry = ConnectionRegistry::new(connector, &config());
        registry.get_or_connect(&endpoint(1)).await.unwrap();
        registry.get_or_connect(&endpoint(2)).await.unwrap();

        registry.inner.entries.get_mut("10.0.0.9:2").unwrap().retry = true;

        let healthy = registry.filter_healthy(vec![endpoint(1), endpoint(2), endpoint(3)]);
        let ports: Vec<u16> = healthy.iter().map(|e| e.port).collect();
        assert_eq!(ports, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_normal_close_removes_entry() {
        let connector = DuplexConnector::new(Duration::ZERO);
        let registry = ConnectionRegistry::new(connector.clone(), &config());
        registry.get_or_connect(&endpoint(5)).await.unwrap();

        // peer hangs up cleanly
        connector.peers.lock().unwrap().clear();

        for _ in 0..100 {
            if !registry.contains("10.0.0.9:5") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!registry.contains("10.0.0.9:5"));
    }

    #[tokio::test]
    async fn test_dial_lock_released_with_entry() {
        let registry = ConnectionRegistry::new(Arc::new(RefusingConnector), &config());
        assert!(registry.get_or_connect(&endpoint(4)).await.is_err());
        assert!(registry.inner.dial_locks.is_empty());

        let connector = DuplexConnector::new(Duration::ZERO);
        let registry = ConnectionRegistry::new(connector.clone(), &config());
        registry.get_or_connect(&endpoint(5)).await.unwrap();
        assert_eq!(registry.inner.dial_locks.len(), 1);

        connector.peers.lock().unwrap().clear();
        for _ in 0..100 {
            if registry.inner.dial_locks.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!registry.contains("10.0.0.9:5"));
        assert!(registry.inner.dial_locks.is_empty());
    }

    #[tokio::test]
    async fn test_held_dial_lock_is_kept() {
        let registry = ConnectionRegistry::new(Arc::new(RefusingConnector), &config());
        let held = registry.inner.dial_lock("10.0.0.9:8");
        registry.inner.forget_dial_lock("10.0.0.9:8");
        assert_eq!(registry.inner.dial_locks.len(), 1);

        drop(held);
        registry.inner.forget_dial_lock("10.0.0.9:8");
        assert!(registry.inner.dial_locks.is_empty());
    }

    /// Dials succeed until `refuse` is set.
    struct SwitchConnector {
        refuse: AtomicBool,
        peers: StdMutex<Vec<DuplexStream>>,
    }

    #[async_trait]
    impl Connector for SwitchConnector {
        async fn connect(&self, addr: &str) -> Result<BoxedStream> {
            if self.refuse.load(Ordering::SeqCst) {
                return Err(RpcError::connect(addr, "connection refused"));
            }
            let (local, remote) = tokio::io::duplex(4096);
            self.peers.lock().unwrap().push(remote);
            Ok(Box::new(local))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_reconnect_releases_dial_lock() {
        let connector = Arc::new(SwitchConnector {
            refuse: AtomicBool::new(false),
            peers: StdMutex::new(Vec::new()),
        });
        let registry = ConnectionRegistry::new(connector.clone(), &config());
        registry.get_or_connect(&endpoint(9)).await.unwrap();

        connector.refuse.store(true, Ordering::SeqCst);
        registry.inner.entries.get_mut("10.0.0.9:9").unwrap().retry = true;
        reconnect::run(Arc::clone(&registry.inner), "10.0.0.9:9".to_string()).await;

        assert!(!registry.contains("10.0.0.9:9"));
        assert!(registry.inner.dial_locks.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_closes_connections() {
        let connector = DuplexConnector::new(Duration::ZERO);
        let registry = ConnectionRegistry::new(connector, &config());
        let connection = registry.get_or_connect(&endpoint(6)).await.unwrap();

        registry.shutdown();
        assert!(!connection.is_open());
        assert!(registry.is_empty());
    }
}
