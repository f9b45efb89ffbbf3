//! brevrpc
//!
//! Facade over the brevrpc workspace crates. Applications usually depend on
//! this crate and reach the pieces through the re-exported modules:
//!
//! - [`common`]: wire protocol, payload codecs and errors
//! - [`balancer`]: endpoints, load balancing strategies and the service registry seam
//! - [`client`]: connection management and call invocation
//! - [`server`]: service hosting and inbound dispatch

pub use brevrpc_balancer as balancer;
pub use brevrpc_client as client;
pub use brevrpc_common as common;
pub use brevrpc_server as server;

pub use brevrpc_common::{Result, RpcError};
