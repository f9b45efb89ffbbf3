use std::net::SocketAddr;
use std::time::Duration;

use brevrpc_balancer::{DEFAULT_WARMUP, DEFAULT_WEIGHT};

/// Server configuration.
///
/// # Default Configuration
///
/// - `bind_addr`: `0.0.0.0:2526`
/// - `worker_max`: 200 handlers running at once
/// - `queue_depth`: 500 requests waiting for a worker before rejection
/// - `idle_timeout`: 30s without inbound data closes a connection
/// - `advertise_weight` / `advertise_warmup`: 50 and 5 minutes
///
/// # Example
///
/// ```
/// use brevrpc_server::ServerConfig;
///
/// let config = ServerConfig::default()
///     .with_bind_addr("127.0.0.1:0".parse().unwrap())
///     .with_workers(8)
///     .with_queue_depth(16);
/// assert_eq!(config.worker_max, 8);
/// ```
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub worker_max: usize,
    pub queue_depth: usize,
    pub idle_timeout: Duration,
    /// Host advertised to the registry. Defaults to the bound IP.
    pub advertise_host: Option<String>,
    pub advertise_weight: u32,
    pub advertise_warmup: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 2526)),
            worker_max: 200,
            queue_depth: 500,
            idle_timeout: Duration::from_secs(30),
            advertise_host: None,
            advertise_weight: DEFAULT_WEIGHT,
            advertise_warmup: DEFAULT_WARMUP,
        }
    }
}

impl ServerConfig {
    pub fn with_bind_addr(mut self, bind_addr: SocketAddr) -> Self {
        self.bind_addr = bind_addr;
        self
    }

    /// Sets how many handlers run at once, at least one.
    pub fn with_workers(mut self, max: usize) -> Self {
        self.worker_max = max.max(1);
        self
    }

    pub fn with_queue_depth(mut self, queue_depth: usize) -> Self {
        self.queue_depth = queue_depth;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_advertise_host(mut self, host: impl Into<String>) -> Self {
        self.advertise_host = Some(host.into());
        self
    }

    pub fn with_advertise_weight(mut self, weight: u32) -> Self {
        self.advertise_weight = weight;
        self
    }

    pub fn with_advertise_warmup(mut self, warmup: Duration) -> Self {
        self.advertise_warmup = warmup;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 2526);
        assert_eq!(config.worker_max, 200);
        assert_eq!(config.queue_depth, 500);
        assert_eq!(config.idle_timeout, Duration::from_secs(30));
        assert_eq!(config.advertise_weight, 50);
    }

    #[test]
    fn test_worker_count_is_at_least_one() {
        assert_eq!(ServerConfig::default().with_workers(0).worker_max, 1);
        assert_eq!(ServerConfig::default().with_workers(8).worker_max, 8);
    }
}
