/*
[INPUT]:  Correlated requests and their eventual replies/failures
[OUTPUT]: Single-fulfillment completion slots with deadlines
[POS]:    WebSocket layer - pending-request table
[UPDATE]: When changing correlation or timeout semantics
*/

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{PocketOptionError, Result};

struct Waiter {
    tx: oneshot::Sender<Result<Value>>,
    timer: Option<JoinHandle<()>>,
}

/// Table of in-flight correlated requests.
///
/// One entry per correlation key, fulfilled exactly once. Duplicate or late
/// replies from the venue are logged no-ops rather than errors - the wire
/// repeats itself. `fail_all` sweeps the table on disconnect so no waiter is
/// left dangling.
#[derive(Clone, Default)]
pub struct PendingRequests {
    inner: Arc<Mutex<HashMap<String, Waiter>>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request under `key`, failing it with a timeout error if no
    /// reply arrives within `deadline`.
    ///
    /// Errors immediately if `key` already has an entry in flight - reusing a
    /// live correlation key is a caller bug, not a race to tolerate.
    pub fn register(&self, key: &str, deadline: Duration) -> Result<RequestHandle> {
        let (tx, rx) = oneshot::channel();
        {
            let mut table = self.lock();
            if table.contains_key(key) {
                return Err(PocketOptionError::DuplicateRequestId(key.to_string()));
            }
            table.insert(
                key.to_string(),
                Waiter { tx, timer: None },
            );
        }

        let timer = tokio::spawn({
            let table = self.clone();
            let key = key.to_string();
            async move {
                tokio::time::sleep(deadline).await;
                table.fail(
                    &key,
                    PocketOptionError::RequestTimeout {
                        key: key.clone(),
                        deadline,
                    },
                );
            }
        });
        if let Some(waiter) = self.lock().get_mut(key) {
            waiter.timer = Some(timer);
        } else {
            // Already resolved between insert and timer spawn.
            timer.abort();
        }

        Ok(RequestHandle {
            key: key.to_string(),
            rx,
            table: self.clone(),
        })
    }

    /// Complete the request registered under `key` with a reply payload
    pub fn fulfill(&self, key: &str, value: Value) {
        self.complete(key, Ok(value));
    }

    /// Fail the request registered under `key`
    pub fn fail(&self, key: &str, error: PocketOptionError) {
        self.complete(key, Err(error));
    }

    /// Fail every outstanding request; called when the connection drops
    pub fn fail_all(&self, reason: &str) {
        let drained: Vec<(String, Waiter)> = self.lock().drain().collect();
        if !drained.is_empty() {
            warn!(count = drained.len(), reason, "failing all pending requests");
        }
        for (key, waiter) in drained {
            if let Some(timer) = waiter.timer {
                timer.abort();
            }
            let _ = waiter
                .tx
                .send(Err(PocketOptionError::ConnectionLost(format!(
                    "{reason} (request `{key}`)"
                ))));
        }
    }

    /// Drop the entry for `key` without resolving it (caller cancelled)
    pub fn deregister(&self, key: &str) {
        if let Some(waiter) = self.lock().remove(key)
            && let Some(timer) = waiter.timer
        {
            timer.abort();
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn complete(&self, key: &str, result: Result<Value>) {
        let Some(waiter) = self.lock().remove(key) else {
            debug!(key, "reply for unknown or already-resolved request, dropping");
            return;
        };
        if let Some(timer) = waiter.timer {
            timer.abort();
        }
        // The waiter may have gone away (cancelled wait); that is fine.
        let _ = waiter.tx.send(result);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Waiter>> {
        self.inner.lock().expect("pending table lock poisoned")
    }
}

impl std::fmt::Debug for PendingRequests {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequests")
            .field("in_flight", &self.len())
            .finish()
    }
}

/// Caller side of one registered request.
///
/// Dropping the handle without awaiting deregisters the entry so the table
/// never accumulates dangling slots.
#[derive(Debug)]
pub struct RequestHandle {
    key: String,
    rx: oneshot::Receiver<Result<Value>>,
    table: PendingRequests,
}

impl RequestHandle {
    /// Correlation key this handle waits on
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Suspend until the request is fulfilled, failed, or timed out
    pub async fn wait(mut self) -> Result<Value> {
        let result = (&mut self.rx).await;
        match result {
            Ok(outcome) => outcome,
            // Sender dropped without resolving: table was torn down.
            Err(_) => Err(PocketOptionError::ConnectionLost(format!(
                "request `{}` abandoned",
                self.key
            ))),
        }
    }
}

impl Drop for RequestHandle {
    fn drop(&mut self) {
        self.table.deregister(&self.key);
    }
}
