use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use brevrpc_common::transport::heartbeat_ping;

use crate::config::HeartbeatConfig;
use crate::connection::{Connection, ConnectionContext};
use crate::correlation::CallOutcome;

/// What a connection does when its read side has been idle for a full
/// heartbeat interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleAction {
    /// Probe the peer with a ping.
    Ping,
    /// Too many pongs missed: flag for reconnection and close.
    Reconnect,
}

/// Heartbeat logic shared by every client connection.
#[derive(Debug, Clone)]
pub struct LivenessSupervisor {
    config: HeartbeatConfig,
}

impl LivenessSupervisor {
    pub fn new(config: HeartbeatConfig) -> Self {
        Self { config }
    }

    pub fn interval(&self) -> Duration {
        self.config.interval
    }

    pub fn decide(&self, missed_heartbeats: u32) -> IdleAction {
        if missed_heartbeats > self.config.max_missed {
            IdleAction::Reconnect
        } else {
            IdleAction::Ping
        }
    }

    /// Runs on every idle timer fire of `connection`.
    ///
    /// The ping is registered in the heartbeat table before it is written;
    /// a timeout bumps the connection's missed counter and a pong resets it.
    pub(crate) fn on_idle(&self, connection: &Arc<Connection>, ctx: &Arc<ConnectionContext>) {
        let missed = connection.missed_heartbeats();
        if self.decide(missed) == IdleAction::Reconnect {
            warn!(
                "{} missed {} heartbeats (max {}), reconnecting",
                connection.key(),
                missed,
                self.config.max_missed
            );
            connection.mark_retry();
            connection.close();
            return;
        }

        let request_id = ctx.ids.next_id();
        let frame = match heartbeat_ping(request_id, ctx.serialization) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Failed to encode heartbeat for {}: {}", connection.key(), e);
                return;
            }
        };
        let rx = ctx.heartbeats.register(request_id, connection.id());
        let timeout = self.config.timeout;
        let connection = Arc::clone(connection);
        let ctx = Arc::clone(ctx);

        tokio::spawn(async move {
            debug!("Sending heartbeat {} to {}", request_id, connection.key());
            if let Err(e) = connection.send(frame).await {
                ctx.heartbeats.fail(request_id, e);
            }

            match ctx.heartbeats.wait(request_id, rx, timeout).await {
                CallOutcome::Success(body) => {
                    debug!("Heartbeat {} answered: {}", request_id, body);
                    connection.reset_missed_heartbeats();
                }
                CallOutcome::Timeout => {
                    let missed = connection.record_missed_heartbeat();
                    warn!(
                        "Heartbeat {} to {} timed out ({} missed)",
                        request_id,
                        connection.key(),
                        missed
                    );
                }
                CallOutcome::Failed(e) => {
                    debug!("Heartbeat {} to {} failed: {}", request_id, connection.key(), e);
                }
            }
        });
    }
}
