//! Internal event reporting.
//!
//! Operational events (drops, reconnects, parse failures) are logged locally
//! through `tracing` and also turned into GELF messages that travel through
//! the same event buffer as ingested logs, so they reach the queue too.
//!
//! The reporter is also the single entry point producers use to enqueue
//! serialized messages, which is where buffer overflow warnings originate.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, error, info, warn};

use crate::buffer::{EnqueueOutcome, EventBuffer};
use crate::error::Result;
use crate::message::{now_timestamp, Message, Severity, GELF_VERSION};

/// `_via_proto` tag for internally generated events.
const INTERNAL_PROTO: &str = "internal_gelf";

/// Builds internal events and feeds the event buffer.
#[derive(Debug)]
pub struct Reporter {
    hostname: String,
    app_name: String,
    source_ip: String,
    static_fields: Message,
    buffer: Arc<EventBuffer>,
}

impl Reporter {
    /// Create a reporter.
    ///
    /// `source_ip` is stamped as `_event_source_ip` on internal events;
    /// `static_fields` are added to every internal event.
    pub fn new(
        hostname: impl Into<String>,
        source_ip: impl Into<String>,
        static_fields: Message,
        buffer: Arc<EventBuffer>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            app_name: format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            source_ip: source_ip.into(),
            static_fields,
            buffer,
        }
    }

    pub fn static_fields(&self) -> &Message {
        &self.static_fields
    }

    pub fn buffer(&self) -> &Arc<EventBuffer> {
        &self.buffer
    }

    /// Place a serialized message in the event buffer.
    pub fn submit(&self, payload: Bytes) {
        if let EnqueueOutcome::Overflowed { report: true } = self.buffer.enqueue(payload) {
            self.report(
                Severity::Error,
                &format!(
                    "Buffer full ({} items), discarding oldest log event",
                    self.buffer.capacity()
                ),
                "",
            );
        }
    }

    /// Add the static fields, serialize and buffer a message.
    pub fn submit_message(&self, mut message: Message) -> Result<()> {
        message.extend_from(&self.static_fields);
        let payload = message.to_bytes()?;
        self.submit(payload);
        Ok(())
    }

    /// Log an operational event locally and forward it as a GELF message.
    pub fn report(&self, level: Severity, short_message: &str, full_message: &str) {
        match level {
            Severity::Emergency | Severity::Alert | Severity::Critical | Severity::Error => {
                error!(detail = full_message, "{}", short_message)
            }
            Severity::Warning => warn!(detail = full_message, "{}", short_message),
            Severity::Notice | Severity::Info => info!("{}", short_message),
            Severity::Debug => debug!("{}", short_message),
        }

        let message = self.internal_event(level, short_message, full_message);
        if let Err(e) = self.submit_message(message) {
            error!(error = %e, "Internal event could not be serialized");
        }
    }

    fn internal_event(&self, level: Severity, short_message: &str, full_message: &str) -> Message {
        let mut message = Message::with_capacity(10 + self.static_fields.len());
        message.insert("version", GELF_VERSION);
        message.insert("host", self.hostname.as_str());
        message.insert("level", level.code());
        message.insert("_app_name", self.app_name.as_str());
        message.insert("short_message", short_message);
        message.insert("full_message", full_message);
        message.insert("timestamp", now_timestamp());
        message.insert("_via_hostname", self.hostname.as_str());
        message.insert("_via_proto", INTERNAL_PROTO);
        message.insert("_event_source_ip", self.source_ip.as_str());
        message
    }
}
