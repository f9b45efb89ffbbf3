use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tracing::debug;

use crate::consistent_hash::ConsistentHashLoadBalancer;
use crate::endpoint::Endpoint;
use crate::random::RandomLoadBalancer;
use crate::round_robin::RoundRobinLoadBalancer;

/// A load balancing strategy.
///
/// `pick` is only ever called with two or more candidates; empty and single
/// candidate lists are handled by [`EndpointSelector`].
pub trait LoadBalancer: Send + Sync {
    fn pick(&self, service_key: &str, candidates: &[Endpoint], request_identity: &str) -> usize;

    /// Drops any state cached for `service_key`.
    fn invalidate(&self, _service_key: &str) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadBalancerKind {
    #[default]
    ConsistentHash,
    RoundRobin,
    Random,
}

impl LoadBalancerKind {
    pub fn build(self) -> Arc<dyn LoadBalancer> {
        match self {
            LoadBalancerKind::ConsistentHash => Arc::new(ConsistentHashLoadBalancer::new()),
            LoadBalancerKind::RoundRobin => Arc::new(RoundRobinLoadBalancer::new()),
            LoadBalancerKind::Random => Arc::new(RandomLoadBalancer::new()),
        }
    }
}

impl FromStr for LoadBalancerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "consistent-hash" | "consistenthash" | "hash" => Ok(LoadBalancerKind::ConsistentHash),
            "round-robin" | "roundrobin" | "rr" => Ok(LoadBalancerKind::RoundRobin),
            "random" => Ok(LoadBalancerKind::Random),
            other => Err(format!("unknown load balancer '{}'", other)),
        }
    }
}

impl fmt::Display for LoadBalancerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoadBalancerKind::ConsistentHash => "consistent-hash",
            LoadBalancerKind::RoundRobin => "round-robin",
            LoadBalancerKind::Random => "random",
        };
        f.write_str(name)
    }
}

/// Picks one endpoint out of a candidate list with the configured strategy.
///
/// # Example
///
/// ```
/// use brevrpc_balancer::{Endpoint, EndpointSelector, LoadBalancerKind};
///
/// let selector = EndpointSelector::new(LoadBalancerKind::RoundRobin);
/// assert!(selector.select("Foo#1.0.0", &[], "call-1").is_none());
///
/// let only = vec![Endpoint::new("Foo", "1.0.0", "127.0.0.1", 2526)];
/// assert_eq!(selector.select("Foo#1.0.0", &only, "call-1"), Some(only[0].clone()));
/// ```
#[derive(Clone)]
pub struct EndpointSelector {
    kind: LoadBalancerKind,
    strategy: Arc<dyn LoadBalancer>,
}

impl EndpointSelector {
    pub fn new(kind: LoadBalancerKind) -> Self {
        Self {
            kind,
            strategy: kind.build(),
        }
    }

    /// Wraps a custom strategy.
    pub fn with_strategy(kind: LoadBalancerKind, strategy: Arc<dyn LoadBalancer>) -> Self {
        Self { kind, strategy }
    }

    pub fn kind(&self) -> LoadBalancerKind {
        self.kind
    }

    /// Returns `None` when there is nothing to choose from. A single
    /// candidate is returned without consulting the strategy.
    pub fn select(
        &self,
        service_key: &str,
        candidates: &[Endpoint],
        request_identity: &str,
    ) -> Option<Endpoint> {
        match candidates {
            [] => None,
            [only] => Some(only.clone()),
            _ => {
                let index = self.strategy.pick(service_key, candidates, request_identity);
                let chosen = candidates.get(index)?;
                debug!("{} picked {} for {}", self.kind, chosen.key(), service_key);
                Some(chosen.clone())
            }
        }
    }

    pub fn invalidate(&self, service_key: &str) {
        self.strategy.invalidate(service_key);
    }
}

impl fmt::Debug for EndpointSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointSelector").field("kind", &self.kind).finish()
    }
}
