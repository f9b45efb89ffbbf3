//! Reconnection loop for endpoints whose connection closed abnormally.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::registry::{ConnectionEntry, RegistryInner};

enum Attempt {
    /// Entry vanished, recovered, or the registry is shutting down.
    Stop,
    Dial(u32),
}

/// Redials `key` until it succeeds or the policy's attempts run out.
///
/// While this runs the entry stays in the registry flagged for retry, so
/// endpoint selection skips it. Success installs the new connection and
/// clears the flag; exhaustion removes the entry.
pub(crate) async fn run(inner: Arc<RegistryInner>, key: String) {
    let policy = inner.reconnect.clone();

    loop {
        if inner.is_shutting_down() {
            return;
        }

        let lock = inner.dial_lock(&key);
        let guard = lock.lock().await;

        let attempt = match inner.entries.get_mut(&key) {
            Some(mut entry) if entry.retry => {
                entry.reconnect_attempts += 1;
                Attempt::Dial(entry.reconnect_attempts)
            }
            _ => Attempt::Stop,
        };
        let Attempt::Dial(attempt) = attempt else {
            debug!("Reconnect for {} no longer needed", key);
            return;
        };

        match inner.dial(&key, &key).await {
            Ok((connection, driver)) => {
                if inner.is_shutting_down() {
                    connection.close();
                    return;
                }
                let previous = inner.entries.insert(
                    key.clone(),
                    ConnectionEntry {
                        connection: Arc::clone(&connection),
                        retry: false,
                        reconnect_attempts: 0,
                    },
                );
                if let Some(previous) = previous {
                    previous.connection.close();
                }
                driver.start();
                info!("Reconnected to {} on attempt {} (connection {})", key, attempt, connection.id());
                return;
            }
            Err(e) => {
                warn!("Reconnect attempt {}/{} to {} failed: {}", attempt, policy.max_attempts, key, e);
                if attempt >= policy.max_attempts {
                    if let Some((_, entry)) = inner.entries.remove(&key) {
                        entry.connection.close();
                    }
                    drop(guard);
                    drop(lock);
                    inner.forget_dial_lock(&key);
                    warn!("Giving up on {} after {} attempts", key, attempt);
                    return;
                }
            }
        }

        drop(guard);
        tokio::time::sleep(policy.backoff).await;
    }
}
