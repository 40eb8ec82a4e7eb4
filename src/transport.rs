//! Delivery transport.
//!
//! The [`Transport`] trait abstracts the remote queue: `open` establishes (or
//! re-establishes) the connection and `send` submits one message body. The
//! HTTP implementation posts each message to a queue endpoint and keeps one
//! pooled client that is replaced on every successful `open`.

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header, Client};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};

/// Backoff between failed `open` attempts.
pub const OPEN_RETRY_INTERVAL: Duration = Duration::from_secs(30);

/// A remote queue that accepts one message body per call.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish the connection, replacing any previous one.
    async fn open(&self) -> Result<()>;

    /// Submit a single message. Success or failure is all-or-nothing.
    async fn send(&self, payload: &Bytes) -> Result<()>;

    /// Human-readable destination, for logs.
    fn destination(&self) -> &str;
}

/// Call `open` until it succeeds, sleeping `backoff` between attempts.
pub async fn open_with_retry(transport: &dyn Transport, backoff: Duration) {
    loop {
        match transport.open().await {
            Ok(()) => {
                info!(destination = transport.destination(), "Queue opened");
                return;
            }
            Err(e) => {
                error!(
                    error = %e,
                    destination = transport.destination(),
                    retry_in_secs = backoff.as_secs(),
                    "Error opening queue"
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

/// Transport posting JSON messages to an HTTP queue endpoint.
pub struct HttpTransport {
    /// Queue endpoint, checked on open and posted to on send
    queue_url: String,

    /// Request timeout duration
    timeout: Duration,

    /// Client of the current connection; `None` until the first open
    connection: RwLock<Option<Client>>,
}

impl HttpTransport {
    pub fn new(config: &Config) -> Self {
        Self::with_settings(config.queue_url.clone(), config.request_timeout)
    }

    pub fn with_settings(queue_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            queue_url: queue_url.into(),
            timeout,
            connection: RwLock::new(None),
        }
    }

    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_open(&self) -> bool {
        self.connection
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    fn client(&self) -> Option<Client> {
        self.connection
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open(&self) -> Result<()> {
        let client = Client::builder()
            .timeout(self.timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| Error::TransportOpenFailed(e.to_string()))?;

        let response = client
            .get(&self.queue_url)
            .send()
            .await
            .map_err(|e| Error::TransportOpenFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::TransportOpenFailed(format!(
                "unable to find queue {} (status {})",
                self.queue_url, status
            )));
        }

        *self.connection.write().unwrap_or_else(|e| e.into_inner()) = Some(client);
        debug!(queue_url = %self.queue_url, "Queue endpoint reachable");
        Ok(())
    }

    async fn send(&self, payload: &Bytes) -> Result<()> {
        let client = self
            .client()
            .ok_or_else(|| Error::TransportSendFailed("queue is not open".to_string()))?;

        let response = client
            .post(&self.queue_url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(payload.clone())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::TransportSendFailed("request timed out".to_string())
                } else {
                    Error::TransportSendFailed(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            warn!(status = %status, "Queue rejected message");
            Err(Error::TransportSendFailed(format!(
                "server error ({}): {}",
                status, message
            )))
        }
    }

    fn destination(&self) -> &str {
        &self.queue_url
    }
}
