//! Reconnect coordination.
//!
//! Any failed send posts a request on a bounded channel. One watcher task
//! consumes a request, reopens the transport (retrying until it succeeds) and
//! then discards whatever requests piled up meanwhile, so a burst of failures
//! costs a single reconnect cycle.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info};

use crate::message::Severity;
use crate::reporter::Reporter;
use crate::transport::{open_with_retry, Transport, OPEN_RETRY_INTERVAL};

/// Pending reconnect requests kept before further requests are dropped.
pub const RECONNECT_QUEUE_CAPACITY: usize = 1024;

/// Create a connected request handle and receiving end.
pub fn channel(capacity: usize) -> (ReconnectHandle, ReconnectRequests) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ReconnectHandle { tx }, ReconnectRequests { rx })
}

/// Cloneable sender used by workers to ask for a reconnect.
#[derive(Debug, Clone)]
pub struct ReconnectHandle {
    tx: mpsc::Sender<()>,
}

impl ReconnectHandle {
    /// Post a reconnect request without waiting.
    ///
    /// Returns `false` when the request was not queued; a full queue already
    /// guarantees a reconnect is coming.
    pub fn request(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(())) => {
                debug!("Reconnect queue full, request coalesced");
                false
            }
            Err(TrySendError::Closed(())) => false,
        }
    }
}

/// Receiving end of the reconnect queue.
#[derive(Debug)]
pub struct ReconnectRequests {
    rx: mpsc::Receiver<()>,
}

impl ReconnectRequests {
    /// Wait for the next request. `false` once every handle is gone.
    pub async fn recv(&mut self) -> bool {
        self.rx.recv().await.is_some()
    }

    /// Discard all requests currently queued, returning how many there were.
    pub fn drain(&mut self) -> usize {
        let mut count = 0;
        while self.rx.try_recv().is_ok() {
            count += 1;
        }
        count
    }
}

/// Task that reopens the transport on demand.
pub struct ReconnectWatcher {
    requests: ReconnectRequests,
    transport: Arc<dyn Transport>,
    reporter: Arc<Reporter>,
    backoff: Duration,
}

impl ReconnectWatcher {
    pub fn new(
        requests: ReconnectRequests,
        transport: Arc<dyn Transport>,
        reporter: Arc<Reporter>,
    ) -> Self {
        Self {
            requests,
            transport,
            reporter,
            backoff: OPEN_RETRY_INTERVAL,
        }
    }

    /// Override the backoff between failed open attempts.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Serve requests until every [`ReconnectHandle`] has been dropped.
    pub async fn run(mut self) {
        while self.requests.recv().await {
            self.reporter.report(
                Severity::Warning,
                &format!("Reconnecting to {}", self.transport.destination()),
                "",
            );
            open_with_retry(self.transport.as_ref(), self.backoff).await;

            let coalesced = self.requests.drain();
            info!(
                destination = self.transport.destination(),
                coalesced, "Reconnect complete"
            );
        }
        debug!("Reconnect watcher stopped");
    }
}
