use std::time::Duration;

use brevrpc_balancer::LoadBalancerKind;
use brevrpc_common::transport::SerializationType;

/// Reconnection policy.
///
/// After an abnormal close the registry redials up to `max_attempts` times,
/// waiting `backoff` after each failed attempt, then gives the endpoint up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(10),
        }
    }
}

/// Heartbeat settings for every client connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// A connection with no inbound read for this long sends a ping.
    pub interval: Duration,
    /// How long a ping waits for its pong before it counts as missed.
    pub timeout: Duration,
    /// Consecutive missed pongs tolerated before the connection is recycled.
    pub max_missed: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(8),
            timeout: Duration::from_secs(8),
            max_missed: 5,
        }
    }
}

/// Client configuration.
///
/// # Default Configuration
///
/// - `io_threads`: 2
/// - `heartbeat`: 8s interval and timeout, 5 missed pongs tolerated
/// - `reconnect`: 3 attempts, 10s apart
/// - `load_balancer`: consistent hash
/// - `call_timeout`: 5s
/// - `connect_timeout`: 3s
/// - `serialization`: postcard
///
/// # Example
///
/// ```
/// use brevrpc_client::ClientConfig;
/// use brevrpc_balancer::LoadBalancerKind;
/// use std::time::Duration;
///
/// let config = ClientConfig::default()
///     .with_load_balancer(LoadBalancerKind::RoundRobin)
///     .with_call_timeout(Duration::from_millis(500));
/// assert_eq!(config.io_threads, 2);
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Worker threads of the runtime owned by [`crate::BlockingClient`].
    pub io_threads: usize,
    pub heartbeat: HeartbeatConfig,
    pub reconnect: ReconnectPolicy,
    pub load_balancer: LoadBalancerKind,
    pub call_timeout: Duration,
    pub connect_timeout: Duration,
    pub serialization: SerializationType,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            io_threads: 2,
            heartbeat: HeartbeatConfig::default(),
            reconnect: ReconnectPolicy::default(),
            load_balancer: LoadBalancerKind::ConsistentHash,
            call_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(3),
            serialization: SerializationType::Postcard,
        }
    }
}

impl ClientConfig {
    pub fn with_io_threads(mut self, io_threads: usize) -> Self {
        self.io_threads = io_threads.max(1);
        self
    }

    pub fn with_heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_load_balancer(mut self, load_balancer: LoadBalancerKind) -> Self {
        self.load_balancer = load_balancer;
        self
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn with_serialization(mut self, serialization: SerializationType) -> Self {
        self.serialization = serialization;
        self
    }
}
