//! # brevrpc server
//!
//! Hosts services over the brevrpc frame protocol. Requests are decoded on
//! the I/O runtime and executed on a bounded [`WorkerPool`]; heartbeats are
//! answered without touching the pool.
//!
//! - [`ServiceBuilder`] / [`ServiceCatalog`]: typed method handlers
//! - [`WorkerPool`]: blocking-pool execution behind admission and worker semaphores
//! - [`RpcServer`]: TCP accept loop, registry publication, graceful stop

pub mod config;
pub mod dispatcher;
pub mod server;
pub mod service;

pub use config::ServerConfig;
pub use dispatcher::{WorkerPool, REJECTED_MESSAGE};
pub use server::{ConnectionHandler, RpcServer};
pub use service::{Service, ServiceBuilder, ServiceCatalog};
