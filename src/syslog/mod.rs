//! Syslog datagram classification.
//!
//! A datagram is turned into a [`Message`] by the first interpretation that
//! works: an embedded GELF object, then RFC3164/RFC5424 syslog, then a
//! plaintext wrapper. Classification never fails; RFC parse errors are
//! reported as warnings and the datagram falls through to plaintext.

pub mod listener;
pub mod rfc;

use std::net::IpAddr;
use std::sync::Arc;

use chrono::Utc;
use tracing::trace;

use crate::config::Config;
use crate::message::{now_timestamp, FieldValue, Message, Severity, GELF_VERSION};
use crate::net;
use crate::reporter::Reporter;

pub use listener::SyslogListener;
pub use rfc::{SyslogFormat, SyslogParseError, SyslogRecord};

/// Maximum accepted distance between a message timestamp and the local clock.
pub const MAX_CLOCK_SKEW_SECS: f64 = 240.0;

const PROTO_GELF: &str = "syslog_gelf";
const PROTO_UDP: &str = "syslog_udp";

/// Classifier settings.
#[derive(Debug, Clone, Default)]
pub struct SyslogOptions {
    /// Stored as `_via_hostname` on every message
    pub hostname: String,

    /// Forced `_event_source_ip`
    pub override_source_ip: Option<String>,

    /// Replace a `127.0.0.1` source with the host's outbound address
    pub replace_localhost: bool,

    /// Ignore RFC header timestamps and use the receive time
    pub override_time: bool,

    /// Keep the trimmed datagram as `full_message`
    pub full_message: bool,
}

impl SyslogOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            hostname: config.hostname.clone(),
            override_source_ip: config.syslog_override_source_ip.clone(),
            replace_localhost: config.syslog_replace_localhost,
            override_time: config.syslog_override_time,
            full_message: config.syslog_full_message,
        }
    }
}

/// Replace `timestamp` with `now` if it is not finite or drifts too far from it.
pub fn sanitize_timestamp(timestamp: f64, now: f64) -> f64 {
    if !timestamp.is_finite() || (timestamp - now).abs() > MAX_CLOCK_SKEW_SECS {
        now
    } else {
        timestamp
    }
}

/// Byte range of the outermost `{...}` in `buf`, if any.
fn json_span(buf: &[u8]) -> Option<&[u8]> {
    let start = buf.iter().position(|&b| b == b'{')?;
    let end = buf.iter().rposition(|&b| b == b'}')?;
    (start < end).then(|| &buf[start..=end])
}

/// Turns raw datagrams into messages.
pub struct SyslogClassifier {
    options: SyslogOptions,
    local_ip: Option<IpAddr>,
    reporter: Arc<Reporter>,
}

impl SyslogClassifier {
    pub fn new(options: SyslogOptions, reporter: Arc<Reporter>) -> Self {
        let local_ip = if options.replace_localhost {
            net::outbound_ip()
        } else {
            None
        };
        Self {
            options,
            local_ip,
            reporter,
        }
    }

    /// Use a fixed address when replacing localhost sources.
    pub fn with_local_ip(mut self, local_ip: Option<IpAddr>) -> Self {
        self.local_ip = local_ip;
        self
    }

    pub fn options(&self) -> &SyslogOptions {
        &self.options
    }

    /// Classify one datagram received from `source`.
    pub fn classify(&self, datagram: &[u8], source: IpAddr) -> Message {
        if let Some(message) = self.embedded_gelf(datagram, source) {
            return message;
        }

        let text = String::from_utf8_lossy(datagram);
        let trimmed = text.trim();
        let format = rfc::detect(trimmed.as_bytes());
        let parsed = match format {
            SyslogFormat::Rfc3164 => rfc::parse_rfc3164(trimmed, Utc::now()),
            SyslogFormat::Rfc5424 => rfc::parse_rfc5424(trimmed),
            SyslogFormat::Unknown => return self.plaintext(trimmed, source),
        };

        match parsed {
            Ok(record) => self.from_record(format, record, trimmed, source),
            Err(e) => {
                self.reporter.report(
                    Severity::Warning,
                    &format!("Error parsing {} message: {}", format.name(), e),
                    trimmed,
                );
                self.plaintext(trimmed, source)
            }
        }
    }

    /// `_event_source_ip` for a datagram from `source`.
    pub fn source_ip(&self, source: IpAddr) -> String {
        if let Some(ip) = &self.options.override_source_ip {
            return ip.clone();
        }
        if self.options.replace_localhost && source == IpAddr::from([127, 0, 0, 1]) {
            if let Some(local) = self.local_ip {
                return local.to_string();
            }
        }
        source.to_string()
    }

    fn embedded_gelf(&self, datagram: &[u8], source: IpAddr) -> Option<Message> {
        let span = json_span(datagram)?;
        let mut message = match Message::from_json_slice(span) {
            Ok(message) => message,
            Err(e) => {
                trace!(error = %e, "Datagram is not embedded GELF");
                return None;
            }
        };
        if let Err(e) = message.validate() {
            trace!(error = %e, "Embedded JSON is not valid GELF");
            return None;
        }

        let now = now_timestamp();
        let timestamp = match message.get("timestamp") {
            Some(value) => sanitize_timestamp(value.as_f64().unwrap_or(0.0), now),
            None => now,
        };
        message.insert("timestamp", timestamp);
        message.insert("_via_hostname", self.options.hostname.as_str());
        message.insert("_via_proto", PROTO_GELF);
        message.insert("_event_source_ip", self.source_ip(source));
        Some(message)
    }

    fn from_record(
        &self,
        format: SyslogFormat,
        record: SyslogRecord,
        raw: &str,
        source: IpAddr,
    ) -> Message {
        let now = now_timestamp();
        let timestamp = match record.timestamp {
            Some(ts) if !self.options.override_time => {
                sanitize_timestamp(ts.timestamp_micros() as f64 / 1_000_000.0, now)
            }
            _ => now,
        };

        let mut message = Message::with_capacity(16);
        message.insert("version", GELF_VERSION);
        message.insert("host", record.hostname);
        message.insert("level", i64::from(record.severity));
        message.insert("_facility", rfc::facility_name(record.facility));
        message.insert("_app_name", record.app_name);
        if let Some(proc_id) = record.proc_id {
            message.insert("_proc_id", proc_id);
        }
        if let Some(msg_id) = record.msg_id {
            message.insert("_msg_id", msg_id);
        }
        if let Some(structured_data) = record.structured_data {
            message.insert("_structured_data", structured_data);
        }
        message.insert("short_message", record.message);
        message.insert("timestamp", timestamp);
        message.insert("_original_format", format.name());
        self.stamp_common(&mut message, raw, source);
        message
    }

    fn plaintext(&self, raw: &str, source: IpAddr) -> Message {
        let mut message = Message::with_capacity(10);
        message.insert("version", GELF_VERSION);
        message.insert("host", source.to_string());
        message.insert("short_message", raw);
        message.insert("timestamp", now_timestamp());
        message.insert("_original_format", SyslogFormat::Unknown.name());
        self.stamp_common(&mut message, raw, source);
        message
    }

    fn stamp_common(&self, message: &mut Message, raw: &str, source: IpAddr) {
        message.insert("_via_hostname", self.options.hostname.as_str());
        message.insert("_via_proto", PROTO_UDP);
        message.insert("_event_source_ip", self.source_ip(source));
        if self.options.full_message {
            message.insert("full_message", FieldValue::from(raw));
        }
    }
}
