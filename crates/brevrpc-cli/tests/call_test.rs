//! `brevrpc call` against an in-process `brevrpc serve`.

use std::time::Duration;

use brevrpc_balancer::LoadBalancerKind;
use brevrpc_cli::call::{run_call, CallRequest};
use brevrpc_cli::demo::demo_catalog;
use brevrpc_common::transport::SerializationType;
use brevrpc_server::{RpcServer, ServerConfig};

async fn start_demo() -> (String, tokio::sync::oneshot::Sender<()>) {
    let config = ServerConfig::default()
        .with_bind_addr("127.0.0.1:0".parse().unwrap())
        .with_workers(4);
    let server = RpcServer::bind(config, demo_catalog()).await.unwrap();
    let addr = server.local_addr().to_string();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(server.run_until(async {
        let _ = stop_rx.await;
    }));
    (addr, stop_tx)
}

fn request(addr: &str, service: &str, method: &str, args: &[&str], serialization: SerializationType) -> CallRequest {
    CallRequest {
        endpoints: vec![addr.to_string()],
        service: service.to_string(),
        version: "1.0.0".to_string(),
        method: method.to_string(),
        args: args.iter().map(|a| a.to_string()).collect(),
        serialization,
        load_balancer: LoadBalancerKind::ConsistentHash,
        timeout: Duration::from_secs(5),
    }
}

#[tokio::test]
async fn test_call_demo_services() {
    let (addr, stop) = start_demo().await;

    let one = run_call(request(&addr, "HelloFacade", "hello_rpc", &["ann"], SerializationType::Postcard))
        .await
        .unwrap();
    assert_eq!(one, "HelloFacade: ann");

    let two = run_call(request(&addr, "HelloFacade", "hello_rpc", &["ann", "oslo"], SerializationType::Json))
        .await
        .unwrap();
    assert_eq!(two, "HelloFacade: hello ann, my friend from oslo");

    let array = run_call(request(&addr, "ArrayFacade", "hello", &["bo"], SerializationType::MsgPack))
        .await
        .unwrap();
    assert_eq!(array, "ArrayFacade: bo");

    stop.send(()).unwrap();
}

#[tokio::test]
async fn test_call_unknown_method_reports_remote_error() {
    let (addr, stop) = start_demo().await;

    let err = run_call(request(&addr, "HelloFacade", "goodbye", &["ann"], SerializationType::Postcard))
        .await
        .unwrap_err();
    assert!(format!("{:#}", err).contains("method not exist: goodbye(String)"));

    stop.send(()).unwrap();
}
