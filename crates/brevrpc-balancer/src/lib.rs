//! brevrpc Load Balancing
//!
//! Endpoint model, the three selection strategies and the service registry
//! seam the client discovers endpoints through.
//!
//! # Strategies
//!
//! - **Consistent hash** ([`ConsistentHashLoadBalancer`]): 160 virtual nodes
//!   per endpoint, ring cached per service key and rebuilt only when the
//!   candidate set changes
//! - **Weighted random** ([`RandomLoadBalancer`])
//! - **Weighted round-robin** ([`RoundRobinLoadBalancer`])
//!
//! Random and round-robin use [`Endpoint::effective_weight`], which ramps a
//! freshly registered endpoint up to its declared weight over its warm-up
//! period.

pub mod consistent_hash;
pub mod endpoint;
pub mod load_balancer;
pub mod random;
pub mod registry;
pub mod round_robin;

pub use consistent_hash::ConsistentHashLoadBalancer;
pub use endpoint::{now_millis, Endpoint, DEFAULT_WARMUP, DEFAULT_WEIGHT};
pub use load_balancer::{EndpointSelector, LoadBalancer, LoadBalancerKind};
pub use random::RandomLoadBalancer;
pub use registry::{ChangeListener, InMemoryRegistry, ServiceRegistry};
pub use round_robin::RoundRobinLoadBalancer;
