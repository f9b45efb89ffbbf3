//! Call correlation table.
//!
//! Every outbound frame that expects an answer registers a one-shot slot
//! under its request id before it is written. The slot is removed exactly
//! once: by the matching inbound frame, by a failure, or by the waiter's
//! timeout, whichever takes it out of the map first.

use std::time::Duration;

use brevrpc_common::protocol::error::RpcError;
use brevrpc_common::protocol::RequestId;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::debug;

/// How a pending call ended.
#[derive(Debug)]
pub enum CallOutcome<T> {
    Success(T),
    Timeout,
    Failed(RpcError),
}

impl<T> CallOutcome<T> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, CallOutcome::Timeout)
    }
}

struct PendingCall<T> {
    tx: oneshot::Sender<CallOutcome<T>>,
    connection_id: u64,
}

/// Receiving half handed to the caller by [`PendingCalls::register`].
pub type PendingReceiver<T> = oneshot::Receiver<CallOutcome<T>>;

/// Map from request id to the caller waiting for it.
pub struct PendingCalls<T> {
    pending: DashMap<RequestId, PendingCall<T>>,
}

impl<T> PendingCalls<T> {
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
        }
    }

    /// Registers `request_id` as in flight on `connection_id`.
    pub fn register(&self, request_id: RequestId, connection_id: u64) -> PendingReceiver<T> {
        let (tx, rx) = oneshot::channel();
        let previous = self.pending.insert(request_id, PendingCall { tx, connection_id });
        debug_assert!(previous.is_none(), "request id {} registered twice", request_id);
        rx
    }

    fn resolve(&self, request_id: RequestId, outcome: CallOutcome<T>) -> bool {
        match self.pending.remove(&request_id) {
            Some((_, call)) => {
                // The waiter may already be gone; nothing else to do then.
                let _ = call.tx.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Resolves a pending call with its answer. Returns `false` if nothing
    /// was waiting (late answer after a timeout, or unknown id).
    pub fn complete(&self, request_id: RequestId, value: T) -> bool {
        let resolved = self.resolve(request_id, CallOutcome::Success(value));
        if !resolved {
            debug!("No pending call for request {}, dropping answer", request_id);
        }
        resolved
    }

    pub fn fail(&self, request_id: RequestId, error: RpcError) -> bool {
        self.resolve(request_id, CallOutcome::Failed(error))
    }

    /// Fails every call in flight on `connection_id`.
    pub fn fail_connection(&self, connection_id: u64, reason: &str) -> usize {
        let ids: Vec<RequestId> = self
            .pending
            .iter()
            .filter(|entry| entry.value().connection_id == connection_id)
            .map(|entry| *entry.key())
            .collect();

        ids.into_iter()
            .filter(|id| self.fail(*id, RpcError::CallFailure(reason.to_string())))
            .count()
    }

    /// Fails everything still pending.
    pub fn fail_all(&self, reason: &str) -> usize {
        let ids: Vec<RequestId> = self.pending.iter().map(|entry| *entry.key()).collect();
        ids.into_iter()
            .filter(|id| self.fail(*id, RpcError::CallFailure(reason.to_string())))
            .count()
    }

    /// Waits up to `timeout` for `request_id` to resolve.
    ///
    /// On expiry the slot is removed and [`CallOutcome::Timeout`] returned,
    /// unless a resolver removed it first, in which case its outcome wins.
    pub async fn wait(
        &self,
        request_id: RequestId,
        mut rx: PendingReceiver<T>,
        timeout: Duration,
    ) -> CallOutcome<T> {
        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => CallOutcome::Failed(RpcError::CallFailure(format!(
                "pending call {} was dropped",
                request_id
            ))),
            Err(_) => {
                if self.pending.remove(&request_id).is_some() {
                    return CallOutcome::Timeout;
                }
                rx.await.unwrap_or_else(|_| {
                    CallOutcome::Failed(RpcError::CallFailure(format!(
                        "pending call {} was dropped",
                        request_id
                    )))
                })
            }
        }
    }

    pub fn contains(&self, request_id: RequestId) -> bool {
        self.pending.contains_key(&request_id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl<T> Default for PendingCalls<T> {
    fn default() -> Self {
        Self::new()
    }
}
