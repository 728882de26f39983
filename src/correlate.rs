//! Correlated request/response over a one-way channel.
//!
//! Useful when answers arrive on a different path than requests (an event
//! bus, a socket reader task): each outbound message carries an id, and one
//! inbound dispatcher calls [`Correlator::resolve`] with it.

use crate::error::{FlowError, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tracing::debug;

/// Pending calls keyed by correlation id.
pub struct Correlator<T> {
    pending: Mutex<HashMap<u64, oneshot::Sender<T>>>,
    next_id: AtomicU64,
}

impl<T: Send> Correlator<T> {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate an id, register it, hand it to `send`, then wait up to
    /// `timeout` for the matching [`resolve`](Self::resolve).
    ///
    /// The entry is cleared on every exit path.
    pub async fn call<F, Fut>(&self, send: F, timeout: Duration) -> Result<T>
    where
        F: FnOnce(u64) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if let Err(e) = send(id).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(value)) => Ok(value),
            // sender dropped without an answer
            Ok(Err(_)) => Err(FlowError::Other(format!("call {} abandoned", id))),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                debug!(id, ?timeout, "correlated call timed out");
                Err(FlowError::Timeout(timeout))
            }
        }
    }

    /// Deliver the answer for `id`. Returns false for unknown or expired ids.
    pub async fn resolve(&self, id: u64, value: T) -> bool {
        let entry = self.pending.lock().await.remove(&id);
        match entry {
            // the caller may have given up in the meantime
            Some(tx) => tx.send(value).is_ok(),
            None => false,
        }
    }

    /// Number of calls still waiting for an answer.
    pub async fn pending(&self) -> usize {
        self.pending.lock().await.len()
    }
}

impl<T: Send> Default for Correlator<T> {
    fn default() -> Self {
        Self::new()
    }
}
