//! # brevrpc CLI Entry Point
//!
//! ## Usage
//!
//! ```bash
//! # Host the demo services
//! brevrpc serve -b 0.0.0.0:2526
//!
//! # Call one of them
//! brevrpc call -e 127.0.0.1:2526 --service HelloFacade --method hello_rpc --arg world
//!
//! # Spread calls over two servers, round robin, JSON on the wire
//! brevrpc call -e 10.0.0.1:2526 -e 10.0.0.2:2526 --load-balancer round-robin \
//!     --serialization json --service HelloFacade --method hello_rpc --arg ann --arg oslo
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use argh::FromArgs;

use brevrpc_balancer::LoadBalancerKind;
use brevrpc_cli::call::{run_call, CallRequest};
use brevrpc_cli::demo::demo_catalog;
use brevrpc_common::transport::SerializationType;
use brevrpc_server::{RpcServer, ServerConfig};

#[derive(FromArgs)]
/// brevrpc - custom protocol RPC runtime
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Serve(ServeArgs),
    Call(CallArgs),
}

/// Arguments for hosting the demo services.
///
/// # Example
///
/// ```bash
/// brevrpc serve -b 127.0.0.1:2526 --workers 16 --queue 64
/// ```
#[derive(FromArgs)]
#[argh(subcommand, name = "serve")]
/// host the demo services
struct ServeArgs {
    /// address to bind to
    #[argh(option, short = 'b', default = "\"0.0.0.0:2526\".into()")]
    bind: String,

    /// handlers allowed to run at once
    #[argh(option, default = "200")]
    workers: usize,

    /// requests waiting for a free worker before new ones are rejected
    #[argh(option, default = "500")]
    queue: usize,

    /// seconds without inbound data before a connection is closed
    #[argh(option, long = "idle-timeout", default = "30")]
    idle_timeout_secs: u64,
}

/// Arguments for a single call.
///
/// Prints the string result to stdout; errors go to stderr with a non-zero
/// exit code.
#[derive(FromArgs)]
#[argh(subcommand, name = "call")]
/// call a method and print its string result
struct CallArgs {
    /// server endpoint as host:port, repeatable
    #[argh(option, short = 'e', long = "endpoint")]
    endpoints: Vec<String>,

    /// service interface name
    #[argh(option)]
    service: String,

    /// service version
    #[argh(option, default = "\"1.0.0\".into()")]
    version: String,

    /// method name
    #[argh(option)]
    method: String,

    /// string argument, repeatable
    #[argh(option, long = "arg")]
    args: Vec<String>,

    /// payload codec: postcard, msgpack or json
    #[argh(option, default = "SerializationType::Postcard")]
    serialization: SerializationType,

    /// endpoint selection: consistent-hash, round-robin or random
    #[argh(option, long = "load-balancer", default = "LoadBalancerKind::ConsistentHash")]
    load_balancer: LoadBalancerKind,

    /// call timeout in milliseconds
    #[argh(option, long = "timeout-ms", default = "5000")]
    timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // keep `call` output clean for scripting
    if !matches!(cli.command, Commands::Call(_)) {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    match cli.command {
        Commands::Serve(args) => run_serve(args).await,
        Commands::Call(args) => {
            let result = run_call(CallRequest {
                endpoints: args.endpoints,
                service: args.service,
                version: args.version,
                method: args.method,
                args: args.args,
                serialization: args.serialization,
                load_balancer: args.load_balancer,
                timeout: Duration::from_millis(args.timeout_ms),
            })
            .await?;
            println!("{}", result);
            Ok(())
        }
    }
}

async fn run_serve(args: ServeArgs) -> Result<()> {
    let bind: SocketAddr = args
        .bind
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid bind address {}: {}", args.bind, e))?;
    let config = ServerConfig::default()
        .with_bind_addr(bind)
        .with_workers(args.workers)
        .with_queue_depth(args.queue)
        .with_idle_timeout(Duration::from_secs(args.idle_timeout_secs));

    let server = RpcServer::bind(config, demo_catalog()).await?;
    for endpoint in server.endpoints() {
        tracing::info!("Hosting {}", endpoint);
    }

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for ctrl-c: {}", e);
            }
        })
        .await?;
    Ok(())
}
