//! # brevrpc client
//!
//! Client runtime for brevrpc services. Resolves endpoints from a
//! [`brevrpc_balancer::ServiceRegistry`], balances calls across them and
//! keeps one multiplexed connection per endpoint alive with heartbeats and
//! automatic reconnection.
//!
//! - [`RpcClient`]: async calls, to be used inside a Tokio runtime
//! - [`BlockingClient`]: owns its own I/O runtime and blocks per call
//! - [`ConnectionRegistry`]: per-endpoint connection table
//! - [`PendingCalls`]: request id correlation

pub mod blocking;
pub mod client;
pub mod config;
pub mod connection;
pub mod connector;
pub mod correlation;
pub mod heartbeat;
mod reconnect;
pub mod registry;

pub use blocking::BlockingClient;
pub use client::{CallDescriptor, RpcClient};
pub use config::{ClientConfig, HeartbeatConfig, ReconnectPolicy};
pub use connection::Connection;
pub use connector::{Connector, TcpConnector};
pub use correlation::{CallOutcome, PendingCalls, PendingReceiver};
pub use heartbeat::{IdleAction, LivenessSupervisor};
pub use registry::{ConnectionRegistry, EntryState};
