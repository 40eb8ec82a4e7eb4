//! Delivery of buffered and direct messages to the transport.
//!
//! The buffered path is a single [`DeliveryWorker`] draining the event buffer;
//! a failed send puts the payload back, asks for a reconnect and pauses. The
//! direct path ([`DirectSender`]) is used for one-shot bulk ingestion and
//! retries each message until it is accepted.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, error, warn};

use crate::buffer::EventBuffer;
use crate::message::Severity;
use crate::reconnect::ReconnectHandle;
use crate::reporter::Reporter;
use crate::transport::Transport;

/// Pause after a failed buffered send.
pub const SEND_RETRY_INTERVAL: Duration = Duration::from_secs(15);

/// Backoff between direct send attempts.
pub const DIRECT_SEND_BACKOFF: Duration = Duration::from_secs(30);

/// Occupancy above which the "nearly full" warning is raised.
pub const HIGH_WATERMARK: f64 = 0.8;

/// Occupancy below which the warning is cleared.
pub const LOW_WATERMARK: f64 = 0.6;

/// Transition of the buffer occupancy warning state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatermarkChange {
    Raised,
    Cleared,
}

/// Hysteresis between [`HIGH_WATERMARK`] and [`LOW_WATERMARK`].
#[derive(Debug, Default)]
pub struct Watermark {
    warning: bool,
}

impl Watermark {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_warning(&self) -> bool {
        self.warning
    }

    /// Feed the current fill ratio; returns a change only on transitions.
    pub fn update(&mut self, fill_ratio: f64) -> Option<WatermarkChange> {
        if !self.warning && fill_ratio > HIGH_WATERMARK {
            self.warning = true;
            Some(WatermarkChange::Raised)
        } else if self.warning && fill_ratio < LOW_WATERMARK {
            self.warning = false;
            Some(WatermarkChange::Cleared)
        } else {
            None
        }
    }
}

/// Consumer of the event buffer.
pub struct DeliveryWorker {
    reporter: Arc<Reporter>,
    transport: Arc<dyn Transport>,
    reconnect: ReconnectHandle,
    retry_interval: Duration,
    watermark: Watermark,
}

impl DeliveryWorker {
    pub fn new(
        reporter: Arc<Reporter>,
        transport: Arc<dyn Transport>,
        reconnect: ReconnectHandle,
    ) -> Self {
        Self {
            reporter,
            transport,
            reconnect,
            retry_interval: SEND_RETRY_INTERVAL,
            watermark: Watermark::new(),
        }
    }

    /// Override the pause after a failed send.
    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    fn buffer(&self) -> &Arc<EventBuffer> {
        self.reporter.buffer()
    }

    /// Drain the buffer forever.
    pub async fn run(mut self) {
        loop {
            let payload = self.buffer().dequeue().await;
            self.check_watermark();
            self.deliver(payload).await;
        }
    }

    /// Send one payload; on failure re-buffer it, request a reconnect and pause.
    pub async fn deliver(&mut self, payload: Bytes) -> bool {
        match self.transport.send(&payload).await {
            Ok(()) => {
                debug!(bytes = payload.len(), "Event delivered");
                true
            }
            Err(e) => {
                error!(
                    error = %e,
                    destination = self.transport.destination(),
                    retry_in_secs = self.retry_interval.as_secs(),
                    "Error sending event, will retry"
                );
                self.reporter.submit(payload);
                self.reconnect.request();
                tokio::time::sleep(self.retry_interval).await;
                false
            }
        }
    }

    fn check_watermark(&mut self) {
        let buffer = self.buffer().clone();
        match self.watermark.update(buffer.fill_ratio()) {
            Some(WatermarkChange::Raised) => self.reporter.report(
                Severity::Warning,
                &format!(
                    "Event buffer is more than {:.0}% full ({} of {} items)",
                    HIGH_WATERMARK * 100.0,
                    buffer.len(),
                    buffer.capacity()
                ),
                "",
            ),
            Some(WatermarkChange::Cleared) => self.reporter.report(
                Severity::Notice,
                &format!(
                    "Event buffer is back below {:.0}% full",
                    LOW_WATERMARK * 100.0
                ),
                "",
            ),
            None => {}
        }
    }
}

/// Unbuffered sender for bulk ingestion.
#[derive(Clone)]
pub struct DirectSender {
    transport: Arc<dyn Transport>,
    reconnect: ReconnectHandle,
    backoff: Duration,
}

impl DirectSender {
    pub fn new(transport: Arc<dyn Transport>, reconnect: ReconnectHandle) -> Self {
        Self {
            transport,
            reconnect,
            backoff: DIRECT_SEND_BACKOFF,
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Send `payload`, retrying with a fixed backoff until it is accepted.
    pub async fn send(&self, payload: &Bytes) {
        loop {
            match self.transport.send(payload).await {
                Ok(()) => return,
                Err(e) => {
                    warn!(
                        error = %e,
                        destination = self.transport.destination(),
                        retry_in_secs = self.backoff.as_secs(),
                        "Direct send failed"
                    );
                    self.reconnect.request();
                    tokio::time::sleep(self.backoff).await;
                }
            }
        }
    }
}
