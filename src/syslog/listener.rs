//! UDP syslog listener.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tracing::{debug, trace, Level};

use crate::message::Severity;
use crate::net::hex_dump;
use crate::reporter::Reporter;

use super::SyslogClassifier;

/// Default datagram truncation size in bytes.
pub const DEFAULT_MAX_DATAGRAM: usize = 2048;

/// Pause before retrying a failed bind.
pub const BIND_RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// Receives syslog datagrams, classifies them and buffers the result.
pub struct SyslogListener {
    bind_addr: String,
    max_datagram: usize,
    classifier: Arc<SyslogClassifier>,
    reporter: Arc<Reporter>,
}

impl SyslogListener {
    pub fn new(
        bind_addr: impl Into<String>,
        max_datagram: usize,
        classifier: Arc<SyslogClassifier>,
        reporter: Arc<Reporter>,
    ) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            max_datagram: max_datagram.max(1),
            classifier,
            reporter,
        }
    }

    /// Listen forever, rebinding after bind or read failures.
    pub async fn run(self) {
        loop {
            let socket = self.bind().await;
            let error = self.serve(&socket).await;
            self.reporter.report(
                Severity::Error,
                &format!("UDP read error: {}", error),
                "",
            );
        }
    }

    /// Bind the configured address, retrying until it succeeds.
    pub async fn bind(&self) -> UdpSocket {
        loop {
            match UdpSocket::bind(&self.bind_addr).await {
                Ok(socket) => {
                    self.reporter.report(
                        Severity::Info,
                        &format!("Listening for Syslog messages on UDP {}", self.bind_addr),
                        "",
                    );
                    return socket;
                }
                Err(e) => {
                    self.reporter.report(
                        Severity::Error,
                        &format!("Error starting UDP listener on {}: {}", self.bind_addr, e),
                        "",
                    );
                    tokio::time::sleep(BIND_RETRY_INTERVAL).await;
                }
            }
        }
    }

    /// Receive datagrams from `socket` until a read fails.
    ///
    /// Datagrams longer than the configured maximum are truncated.
    pub async fn serve(&self, socket: &UdpSocket) -> io::Error {
        let mut buf = vec![0u8; self.max_datagram];
        loop {
            match socket.recv_from(&mut buf).await {
                Ok((len, peer)) => self.handle_datagram(&buf[..len], peer),
                Err(e) => return e,
            }
        }
    }

    /// Classify one datagram and place it in the event buffer.
    pub fn handle_datagram(&self, data: &[u8], peer: SocketAddr) {
        if tracing::enabled!(Level::TRACE) {
            trace!(bytes = data.len(), peer = %peer, "Received datagram");
            for row in hex_dump(data) {
                trace!("{}", row);
            }
        }

        let message = self.classifier.classify(data, peer.ip());
        if let Err(e) = self.reporter.submit_message(message) {
            self.reporter.report(
                Severity::Error,
                &format!("Error encoding syslog message: {}", e),
                &String::from_utf8_lossy(data),
            );
            return;
        }
        debug!(peer = %peer, "Syslog message buffered");
    }
}
