use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;

use brevrpc_balancer::{InMemoryRegistry, ServiceRegistry};
use brevrpc_common::protocol::{FrameHeader, MsgStatus, MsgType, Request, Response};
use brevrpc_common::transport::{encode_frame, heartbeat_ping, Envelope, Frame, FrameDecoder, Message, SerializationType};
use brevrpc_server::{ConnectionHandler, RpcServer, ServerConfig, ServiceBuilder, ServiceCatalog, REJECTED_MESSAGE};

// ============================================================================
// Helpers
// ============================================================================

fn greeter() -> ServiceCatalog {
    let mut catalog = ServiceCatalog::new();
    catalog.add(
        ServiceBuilder::new("Greeter", "1.0.0")
            .method("greet", &["String"], |(name,): (String,)| Ok(format!("hi {}", name)))
            .build(),
    );
    catalog
}

fn start(handler: ConnectionHandler) -> (Arc<ConnectionHandler>, DuplexStream, tokio::task::JoinHandle<()>) {
    let handler = Arc::new(handler);
    let (local, remote) = tokio::io::duplex(64 * 1024);
    let task = {
        let handler = handler.clone();
        tokio::spawn(async move { handler.serve_connection(remote, "test-peer".to_string()).await })
    };
    (handler, local, task)
}

async fn read_frame(stream: &mut DuplexStream, decoder: &mut FrameDecoder) -> Option<Frame> {
    loop {
        if let Some(frame) = decoder.decode().unwrap() {
            return Some(frame);
        }
        if decoder.read_from(stream).await.unwrap() == 0 {
            return None;
        }
    }
}

fn request_frame(id: u64, serialization: SerializationType, method: &str, params: &[&str], args: Vec<u8>) -> bytes::Bytes {
    let request = Request::new("Greeter", method, "1.0.0")
        .with_param_types(params.iter().copied())
        .with_args(args);
    Envelope::new(id, serialization, Message::Request(request)).encode().unwrap()
}

fn response_of(frame: &Frame) -> Response {
    match Envelope::decode(frame).unwrap().message {
        Message::Response(response) => response,
        other => panic!("expected response, got {:?}", other),
    }
}

// ============================================================================
// Inbound pipeline
// ============================================================================

#[tokio::test]
async fn test_ping_answered_with_pong() {
    let handler = ConnectionHandler::new(ServerConfig::default().with_workers(1), greeter(), "srv:1");
    let (_handler, mut stream, _task) = start(handler);
    let mut decoder = FrameDecoder::new();

    stream.write_all(&heartbeat_ping(77, SerializationType::Json).unwrap()).await.unwrap();
    let frame = read_frame(&mut stream, &mut decoder).await.unwrap();

    assert_eq!(frame.msg_type(), Some(MsgType::HeartbeatPong));
    assert_eq!(frame.request_id(), 77);
    assert_eq!(frame.header.message_status(), MsgStatus::Success);
    assert_eq!(
        Envelope::decode(&frame).unwrap().message,
        Message::Pong("server: srv:1 return a heart pong".to_string())
    );
}

#[tokio::test]
async fn test_request_answered_in_request_codec() {
    let handler = ConnectionHandler::new(ServerConfig::default().with_workers(2), greeter(), "srv:1");
    let (_handler, mut stream, _task) = start(handler);
    let mut decoder = FrameDecoder::new();

    for (id, serialization) in [(1, SerializationType::MsgPack), (2, SerializationType::Json), (3, SerializationType::Postcard)] {
        let codec = serialization.codec();
        let args = codec.encode(&("ann".to_string(),)).unwrap();
        stream
            .write_all(&request_frame(id, serialization, "greet", &["String"], args))
            .await
            .unwrap();

        let frame = read_frame(&mut stream, &mut decoder).await.unwrap();
        assert_eq!(frame.request_id(), id);
        assert_eq!(frame.header.serialization, serialization.tag());
        let response = response_of(&frame);
        let greeting: String = codec.decode(&response.result.unwrap()).unwrap();
        assert_eq!(greeting, "hi ann");
    }
}

#[tokio::test]
async fn test_unknown_method_is_fail_response() {
    let handler = ConnectionHandler::new(ServerConfig::default().with_workers(1), greeter(), "srv:1");
    let (_handler, mut stream, _task) = start(handler);
    let mut decoder = FrameDecoder::new();

    stream
        .write_all(&request_frame(5, SerializationType::Postcard, "wave", &[], Vec::new()))
        .await
        .unwrap();
    let frame = read_frame(&mut stream, &mut decoder).await.unwrap();

    assert_eq!(frame.header.message_status(), MsgStatus::Fail);
    assert_eq!(response_of(&frame).error.as_deref(), Some("method not exist: wave()"));
}

#[tokio::test]
async fn test_bad_magic_closes_connection() {
    let handler = ConnectionHandler::new(ServerConfig::default().with_workers(1), greeter(), "srv:1");
    let (_handler, mut stream, task) = start(handler);

    stream.write_all(&[0xde, 0xad, 0xbe, 0xef].repeat(8)).await.unwrap();
    task.await.unwrap();

    let mut decoder = FrameDecoder::new();
    assert!(read_frame(&mut stream, &mut decoder).await.is_none());
}

#[tokio::test]
async fn test_unknown_serialization_closes_connection() {
    let handler = ConnectionHandler::new(ServerConfig::default().with_workers(1), greeter(), "srv:1");
    let (_handler, mut stream, task) = start(handler);

    let header = FrameHeader::new(MsgType::Request, 0x7f, 9);
    stream.write_all(&encode_frame(&header, b"??").unwrap()).await.unwrap();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_idle_connection_is_closed() {
    let config = ServerConfig::default()
        .with_workers(1)
        .with_idle_timeout(Duration::from_secs(30));
    let handler = ConnectionHandler::new(config, greeter(), "srv:1");
    let (_handler, mut stream, task) = start(handler);

    tokio::time::timeout(Duration::from_secs(31), task).await.unwrap().unwrap();
    let mut decoder = FrameDecoder::new();
    assert!(read_frame(&mut stream, &mut decoder).await.is_none());
}

#[tokio::test]
async fn test_full_dispatch_queue_rejects_with_fail_response() {
    let (started_tx, mut started_rx) = mpsc::unbounded_channel();
    let (release_tx, release_rx) = std_mpsc::channel::<()>();
    let release_rx = Arc::new(Mutex::new(release_rx));

    let mut catalog = ServiceCatalog::new();
    catalog.add(
        ServiceBuilder::new("Greeter", "1.0.0")
            .method("block", &[], move |(): ()| {
                started_tx.send(()).unwrap();
                release_rx.lock().unwrap().recv_timeout(Duration::from_secs(5)).unwrap();
                Ok("done".to_string())
            })
            .build(),
    );
    let config = ServerConfig::default().with_workers(1).with_queue_depth(1);
    let handler = ConnectionHandler::new(config, catalog, "srv:1");
    let (_handler, mut stream, _task) = start(handler);
    let mut decoder = FrameDecoder::new();
    let codec = SerializationType::Postcard.codec();
    let no_args = codec.encode(&()).unwrap();

    stream
        .write_all(&request_frame(1, SerializationType::Postcard, "block", &[], no_args.clone()))
        .await
        .unwrap();
    started_rx.recv().await.unwrap();

    // 2 waits in the queue, 3 has nowhere to go
    stream
        .write_all(&request_frame(2, SerializationType::Postcard, "block", &[], no_args.clone()))
        .await
        .unwrap();
    stream
        .write_all(&request_frame(3, SerializationType::Postcard, "block", &[], no_args))
        .await
        .unwrap();

    let rejected = read_frame(&mut stream, &mut decoder).await.unwrap();
    assert_eq!(rejected.request_id(), 3);
    assert_eq!(rejected.header.message_status(), MsgStatus::Fail);
    assert_eq!(response_of(&rejected).error.as_deref(), Some(REJECTED_MESSAGE));

    release_tx.send(()).unwrap();
    release_tx.send(()).unwrap();
    let mut completed = Vec::new();
    for _ in 0..2 {
        let frame = read_frame(&mut stream, &mut decoder).await.unwrap();
        assert!(response_of(&frame).is_success());
        completed.push(frame.request_id());
    }
    assert_eq!(completed, vec![1, 2]);
}

// ============================================================================
// TCP server
// ============================================================================

#[tokio::test]
async fn test_publish_advertises_bound_port() {
    let config = ServerConfig::default()
        .with_bind_addr("127.0.0.1:0".parse().unwrap())
        .with_workers(1)
        .with_advertise_weight(70);
    let server = RpcServer::bind(config, greeter()).await.unwrap();
    let registry = InMemoryRegistry::new();

    server.publish(&registry).await.unwrap();
    let endpoints = registry.lookup("Greeter#1.0.0").await.unwrap();
    assert_eq!(endpoints.len(), 1);
    assert_eq!(endpoints[0].address, "127.0.0.1");
    assert_eq!(endpoints[0].port, server.local_addr().port());
    assert_eq!(endpoints[0].weight, 70);

    server.unpublish(&registry).await.unwrap();
    assert!(registry.lookup("Greeter#1.0.0").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_run_until_stops_on_signal() {
    let config = ServerConfig::default()
        .with_bind_addr("127.0.0.1:0".parse().unwrap())
        .with_workers(1);
    let server = RpcServer::bind(config, greeter()).await.unwrap();
    let addr = server.local_addr();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let running = tokio::spawn(server.run_until(async {
        let _ = stop_rx.await;
    }));

    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(&heartbeat_ping(1, SerializationType::Postcard).unwrap())
        .await
        .unwrap();

    stop_tx.send(()).unwrap();
    running.await.unwrap().unwrap();
    assert!(tokio::net::TcpStream::connect(addr).await.is_err());
}
