//! Client side connection driver.
//!
//! A [`Connection`] owns the write half of a stream; a reader task owns the
//! read half, decodes frames, answers pings, resolves pending calls and runs
//! the idle timer that drives heartbeats. When the reader stops it reports a
//! [`ConnectionEvent`] to the registry, which decides between dropping the
//! entry and reconnecting.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::{debug, error, info, warn};

use brevrpc_common::protocol::error::{Result, RpcError};
use brevrpc_common::protocol::{MsgType, RequestIdGenerator, Response};
use brevrpc_common::transport::{heartbeat_pong, BoxedStream, Envelope, Frame, FrameDecoder, Message, SerializationType};

use crate::config::ClientConfig;
use crate::correlation::PendingCalls;
use crate::heartbeat::LivenessSupervisor;

/// Reported by a connection's reader when it stops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ConnectionEvent {
    pub key: String,
    pub connection_id: u64,
    /// `true` when the close was abnormal and the endpoint should be redialed.
    pub retry: bool,
}

/// State shared by every connection of one client.
pub(crate) struct ConnectionContext {
    pub calls: PendingCalls<Response>,
    pub heartbeats: PendingCalls<String>,
    pub ids: RequestIdGenerator,
    pub liveness: LivenessSupervisor,
    pub serialization: SerializationType,
    pub events: mpsc::UnboundedSender<ConnectionEvent>,
}

impl ConnectionContext {
    pub fn new(config: &ClientConfig, events: mpsc::UnboundedSender<ConnectionEvent>) -> Self {
        Self {
            calls: PendingCalls::new(),
            heartbeats: PendingCalls::new(),
            ids: RequestIdGenerator::new(),
            liveness: LivenessSupervisor::new(config.heartbeat.clone()),
            serialization: config.serialization,
            events,
        }
    }
}

/// Handle to one live connection.
pub struct Connection {
    id: u64,
    key: String,
    writer: Mutex<WriteHalf<BoxedStream>>,
    open: AtomicBool,
    retry: AtomicBool,
    missed_heartbeats: AtomicU32,
    shutdown: Notify,
}

/// Read half of a connection that has not started reading yet.
pub(crate) struct ConnectionDriver {
    connection: Arc<Connection>,
    reader: ReadHalf<BoxedStream>,
    ctx: Arc<ConnectionContext>,
}

impl ConnectionDriver {
    /// Starts the reader task.
    pub fn start(self) {
        tokio::spawn(read_loop(self.connection, self.reader, self.ctx));
    }
}

impl Connection {
    pub(crate) fn new(
        id: u64,
        key: impl Into<String>,
        stream: BoxedStream,
        ctx: Arc<ConnectionContext>,
    ) -> (Arc<Self>, ConnectionDriver) {
        let (reader, writer) = tokio::io::split(stream);
        let connection = Arc::new(Self {
            id,
            key: key.into(),
            writer: Mutex::new(writer),
            open: AtomicBool::new(true),
            retry: AtomicBool::new(false),
            missed_heartbeats: AtomicU32::new(0),
            shutdown: Notify::new(),
        });
        let driver = ConnectionDriver {
            connection: Arc::clone(&connection),
            reader,
            ctx,
        };
        (connection, driver)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remote endpoint key, `address:port`.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub fn missed_heartbeats(&self) -> u32 {
        self.missed_heartbeats.load(Ordering::Acquire)
    }

    pub(crate) fn record_missed_heartbeat(&self) -> u32 {
        self.missed_heartbeats.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn reset_missed_heartbeats(&self) {
        self.missed_heartbeats.store(0, Ordering::Release);
    }

    /// Flags the connection so that its close triggers a reconnect.
    pub(crate) fn mark_retry(&self) {
        self.retry.store(true, Ordering::Release);
    }

    fn wants_retry(&self) -> bool {
        self.retry.load(Ordering::Acquire)
    }

    /// Stops the reader. Idempotent.
    pub fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            debug!("Closing connection {} to {}", self.id, self.key);
            self.shutdown.notify_one();
        }
    }

    /// Writes one encoded frame.
    ///
    /// A write error flags the connection for reconnection, closes it and is
    /// returned as [`RpcError::CallFailure`].
    pub async fn send(&self, frame: Bytes) -> Result<()> {
        if !self.is_open() {
            return Err(RpcError::CallFailure(format!("connection to {} is closed", self.key)));
        }

        let mut writer = self.writer.lock().await;
        let written = match writer.write_all(&frame).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };
        drop(writer);

        written.map_err(|e| {
            warn!("Write to {} failed: {}", self.key, e);
            self.mark_retry();
            self.close();
            RpcError::CallFailure(format!("write to {} failed: {}", self.key, e))
        })
    }
}

enum CloseReason {
    Local,
    PeerClosed,
    Io(std::io::Error),
    Fatal(RpcError),
}

async fn read_loop(connection: Arc<Connection>, mut reader: ReadHalf<BoxedStream>, ctx: Arc<ConnectionContext>) {
    let mut decoder = FrameDecoder::new();
    let interval = ctx.liveness.interval();

    let reason = 'read: loop {
        loop {
            match decoder.decode() {
                Ok(Some(frame)) => {
                    if let Err(e) = handle_frame(&connection, &ctx, frame).await {
                        if e.is_fatal_for_connection() {
                            break 'read CloseReason::Fatal(e);
                        }
                        warn!("Dropping frame from {}: {}", connection.key(), e);
                    }
                }
                Ok(None) => break,
                Err(e) => break 'read CloseReason::Fatal(e),
            }
        }

        tokio::select! {
            _ = connection.shutdown.notified() => break 'read CloseReason::Local,
            read = tokio::time::timeout(interval, decoder.read_from(&mut reader)) => match read {
                Err(_) => ctx.liveness.on_idle(&connection, &ctx),
                Ok(Ok(0)) => break 'read CloseReason::PeerClosed,
                Ok(Ok(_)) => {}
                Ok(Err(e)) => break 'read CloseReason::Io(e),
            },
        }
    };

    let retry = match &reason {
        CloseReason::Local => connection.wants_retry(),
        CloseReason::PeerClosed => {
            info!("Connection {} closed by {}", connection.id(), connection.key());
            connection.wants_retry()
        }
        CloseReason::Io(e) => {
            warn!("Connection {} to {} failed: {}", connection.id(), connection.key(), e);
            connection.mark_retry();
            true
        }
        CloseReason::Fatal(e) => {
            error!("Protocol error on connection to {}: {}", connection.key(), e);
            false
        }
    };

    connection.open.store(false, Ordering::Release);
    drop(reader);
    let _ = connection.writer.lock().await.shutdown().await;

    let failed = ctx.calls.fail_connection(connection.id(), "connection closed")
        + ctx.heartbeats.fail_connection(connection.id(), "connection closed");
    if failed > 0 {
        debug!("Failed {} in-flight calls on {}", failed, connection.key());
    }

    let _ = ctx.events.send(ConnectionEvent {
        key: connection.key().to_string(),
        connection_id: connection.id(),
        retry,
    });
}

async fn handle_frame(connection: &Arc<Connection>, ctx: &ConnectionContext, frame: Frame) -> Result<()> {
    if frame.msg_type() == Some(MsgType::HeartbeatPing) {
        let pong = heartbeat_pong(&frame.header, connection.key())?;
        return connection.send(pong).await;
    }

    let request_id = frame.request_id();
    let envelope = match Envelope::decode(&frame) {
        Ok(envelope) => envelope,
        Err(e) => {
            if frame.msg_type() == Some(MsgType::Response) {
                ctx.calls.fail(request_id, RpcError::Protocol(e.to_string()));
            }
            return Err(e);
        }
    };

    let msg_type = envelope.message.msg_type();
    match envelope.message {
        Message::Response(response) => {
            ctx.calls.complete(request_id, response);
        }
        Message::Pong(body) => {
            ctx.heartbeats.complete(request_id, body);
        }
        Message::Request(_) | Message::Ping(_) => {
            warn!("Unexpected {:?} frame from {}", msg_type, connection.key());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HeartbeatConfig;
    use brevrpc_common::transport::{heartbeat_ping, FrameDecoder};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, DuplexStream};

    fn context(heartbeat: HeartbeatConfig) -> (Arc<ConnectionContext>, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let config = ClientConfig::default()
            .with_heartbeat(heartbeat)
            .with_serialization(SerializationType::Json);
        (Arc::new(ConnectionContext::new(&config, tx)), rx)
    }

    fn connect(ctx: &Arc<ConnectionContext>) -> (Arc<Connection>, DuplexStream) {
        let (local, remote) = tokio::io::duplex(64 * 1024);
        let (connection, driver) = Connection::new(1, "10.0.0.1:2526", Box::new(local), ctx.clone());
        driver.start();
        (connection, remote)
    }

    async fn read_frame(remote: &mut DuplexStream, decoder: &mut FrameDecoder) -> Frame {
        loop {
            if let Some(frame) = decoder.decode().unwrap() {
                return frame;
            }
            let mut buf = [0u8; 1024];
            let n = remote.read(&mut buf).await.unwrap();
            assert!(n > 0, "stream closed");
            decoder.extend(&buf[..n]);
        }
    }

    #[tokio::test]
    async fn test_ping_from_peer_gets_exactly_one_pong() {
        let (ctx, _events) = context(HeartbeatConfig::default());
        let (_connection, mut remote) = connect(&ctx);

        remote
            .write_all(&heartbeat_ping(4242, SerializationType::Json).unwrap())
            .await
            .unwrap();

        let mut decoder = FrameDecoder::new();
        let frame = read_frame(&mut remote, &mut decoder).await;
        assert_eq!(frame.msg_type(), Some(MsgType::HeartbeatPong));
        assert_eq!(frame.request_id(), 4242);
        assert_eq!(decoder.buffered(), 0);
        // the ping never reaches the correlation tables
        assert!(ctx.calls.is_empty());
        assert!(ctx.heartbeats.is_empty());
    }

    #[tokio::test]
    async fn test_response_resolves_pending_call() {
        let (ctx, _events) = context(HeartbeatConfig::default());
        let (connection, mut remote) = connect(&ctx);
        let rx = ctx.calls.register(9, connection.id());

        let reply = Envelope::new(9, SerializationType::Json, Message::Response(Response::success(b"ok".to_vec())))
            .encode()
            .unwrap();
        remote.write_all(&reply).await.unwrap();

        match ctx.calls.wait(9, rx, Duration::from_secs(1)).await {
            crate::CallOutcome::Success(response) => assert_eq!(response.result, Some(b"ok".to_vec())),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_peer_close_fails_in_flight_calls_without_retry() {
        let (ctx, mut events) = context(HeartbeatConfig::default());
        let (connection, remote) = connect(&ctx);
        let rx = ctx.calls.register(1, connection.id());

        drop(remote);

        let event = events.recv().await.unwrap();
        assert_eq!(event.key, "10.0.0.1:2526");
        assert!(!event.retry);
        assert!(!connection.is_open());
        assert!(matches!(
            ctx.calls.wait(1, rx, Duration::from_secs(1)).await,
            crate::CallOutcome::Failed(RpcError::CallFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_bad_magic_closes_without_retry() {
        let (ctx, mut events) = context(HeartbeatConfig::default());
        let (_connection, mut remote) = connect(&ctx);

        remote.write_all(&[0xBE; 18]).await.unwrap();

        let event = events.recv().await.unwrap();
        assert!(!event.retry);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_connection_sends_heartbeat_and_counts_misses() {
        let heartbeat = HeartbeatConfig {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(1),
            max_missed: 1,
        };
        let (ctx, mut events) = context(heartbeat);
        let (connection, mut remote) = connect(&ctx);

        let mut decoder = FrameDecoder::new();
        let ping = read_frame(&mut remote, &mut decoder).await;
        assert_eq!(ping.msg_type(), Some(MsgType::HeartbeatPing));

        // never answer: misses pile up until the connection is recycled
        let event = events.recv().await.unwrap();
        assert!(event.retry);
        assert!(connection.missed_heartbeats() > 1);
        assert!(!connection.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pong_resets_missed_counter() {
        let heartbeat = HeartbeatConfig {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(5),
            max_missed: 3,
        };
        let (ctx, _events) = context(heartbeat);
        let (connection, mut remote) = connect(&ctx);
        connection.record_missed_heartbeat();
        connection.record_missed_heartbeat();

        let mut decoder = FrameDecoder::new();
        let ping = read_frame(&mut remote, &mut decoder).await;
        remote
            .write_all(&heartbeat_pong(&ping.header, "server").unwrap())
            .await
            .unwrap();

        for _ in 0..50 {
            if connection.missed_heartbeats() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(connection.missed_heartbeats(), 0);
        assert!(connection.is_open());
    }

    #[tokio::test]
    async fn test_send_after_close_is_call_failure() {
        let (ctx, _events) = context(HeartbeatConfig::default());
        let (connection, _remote) = connect(&ctx);
        connection.close();
        let err = connection.send(Bytes::from_static(b"x")).await.unwrap_err();
        assert!(matches!(err, RpcError::CallFailure(_)));
    }
}
