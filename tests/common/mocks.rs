//! Mock transport for driving the pipeline without a queue

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use log_forwarder::error::{Error, Result};
use log_forwarder::transport::Transport;

/// Transport that rejects its first `fail_sends` sends and records the rest.
#[derive(Default)]
pub struct MockTransport {
    fail_sends: usize,
    sends: AtomicUsize,
    opens: AtomicUsize,
    delivered: Mutex<Vec<Bytes>>,
}

#[allow(dead_code)]
impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(fail_sends: usize) -> Self {
        Self {
            fail_sends,
            ..Self::default()
        }
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn send_attempts(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    pub fn delivered(&self) -> Vec<Bytes> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self) -> Result<()> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, payload: &Bytes) -> Result<()> {
        if self.sends.fetch_add(1, Ordering::SeqCst) < self.fail_sends {
            return Err(Error::TransportSendFailed("connection reset".to_string()));
        }
        self.delivered.lock().unwrap().push(payload.clone());
        Ok(())
    }

    fn destination(&self) -> &str {
        "mock-queue"
    }
}
