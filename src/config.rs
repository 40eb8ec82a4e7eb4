//! Configuration module for the log forwarder.
//!
//! Settings are read from `LOG_FORWARDER_*` environment variables, validated,
//! and fall back to defaults where a variable is unset.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::buffer::DEFAULT_BUFFER_CAPACITY;
use crate::message::Message;
use crate::parser::CustomParserDef;
use crate::syslog::listener::DEFAULT_MAX_DATAGRAM;

/// Default queue endpoint
const DEFAULT_QUEUE_URL: &str = "http://localhost:9324/queue/logs";

/// Largest accepted event buffer capacity
const MAX_EVENT_BUFFER: usize = 1_000_000;

/// Largest accepted syslog datagram size (maximum UDP payload)
const MAX_SYSLOG_UDP: usize = 65_507;

/// Default HTTP request timeout in seconds
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// A file to ingest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFile {
    /// Path of the file
    pub path: PathBuf,

    /// Parser format name applied to every line
    pub format: String,

    /// Read the whole file once instead of tailing it
    pub read_all: bool,
}

/// Configuration for the log forwarder.
///
/// All settings can be configured via environment variables:
/// - `LOG_FORWARDER_QUEUE_URL`: queue endpoint (default: http://localhost:9324/queue/logs)
/// - `LOG_FORWARDER_HOSTNAME`: hostname reported on messages (default: OS hostname)
/// - `LOG_FORWARDER_EVENT_BUFFER`: event buffer capacity (default: 4096)
/// - `LOG_FORWARDER_INPUT_FILES`: `path,format[,readall]` entries separated by `;`
/// - `LOG_FORWARDER_SYSLOG_UDP`: syslog UDP bind address (default: disabled)
/// - `LOG_FORWARDER_SYSLOG_UDP_MAX`: datagram truncation size (default: 2048)
/// - `LOG_FORWARDER_SYSLOG_FULL_MESSAGE`, `LOG_FORWARDER_SYSLOG_OVERRIDE_TIME`,
///   `LOG_FORWARDER_SYSLOG_REPLACE_LOCALHOST`: syslog switches (`yes`/`true`)
/// - `LOG_FORWARDER_SYSLOG_OVERRIDE_SOURCE_IP`: forced event source IP
/// - `LOG_FORWARDER_SITE`: value of the `_site` field added to every message
/// - `LOG_FORWARDER_CUSTOM_PARSERS`: JSON array of custom parser definitions
/// - `LOG_FORWARDER_REQUEST_TIMEOUT_SECS`: HTTP request timeout (default: 30)
#[derive(Debug, Clone)]
pub struct Config {
    /// Queue endpoint messages are delivered to
    pub queue_url: String,

    /// Hostname stamped on parsed and internal messages
    pub hostname: String,

    /// Event buffer capacity
    pub event_buffer: usize,

    /// Files to tail or read
    pub input_files: Vec<InputFile>,

    /// Syslog UDP bind address; `None` disables the listener
    pub syslog_udp: Option<String>,

    /// Datagram truncation size in bytes
    pub syslog_udp_max: usize,

    /// Keep the raw datagram as `full_message`
    pub syslog_full_message: bool,

    /// Replace syslog header timestamps with the receive time
    pub syslog_override_time: bool,

    /// Substitute the outbound IP for `127.0.0.1` sources
    pub syslog_replace_localhost: bool,

    /// Forced `_event_source_ip`
    pub syslog_override_source_ip: Option<String>,

    /// Site name added as `_site`
    pub site: Option<String>,

    /// Additional regex parsers
    pub custom_parsers: Vec<CustomParserDef>,

    /// HTTP request timeout duration
    pub request_timeout: Duration,
}

/// Error type for configuration loading failures
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub env_var: Option<String>,
}

impl ConfigError {
    fn new(env_var: &str, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            env_var: Some(env_var.to_string()),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.env_var {
            Some(var) => write!(f, "Configuration error for {}: {}", var, self.message),
            None => write!(f, "Configuration error: {}", self.message),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Hostname of this machine, or `localhost` if it cannot be determined.
pub fn system_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` naming the offending variable when a value is
    /// malformed or out of range.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Treat empty values as unset
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let queue_url =
            get("LOG_FORWARDER_QUEUE_URL").unwrap_or_else(|| DEFAULT_QUEUE_URL.to_string());
        let hostname = get("LOG_FORWARDER_HOSTNAME").unwrap_or_else(system_hostname);

        let event_buffer = Self::parse_range(
            "LOG_FORWARDER_EVENT_BUFFER",
            get("LOG_FORWARDER_EVENT_BUFFER"),
            DEFAULT_BUFFER_CAPACITY,
            MAX_EVENT_BUFFER,
        )?;
        let syslog_udp_max = Self::parse_range(
            "LOG_FORWARDER_SYSLOG_UDP_MAX",
            get("LOG_FORWARDER_SYSLOG_UDP_MAX"),
            DEFAULT_MAX_DATAGRAM,
            MAX_SYSLOG_UDP,
        )?;

        let input_files = match get("LOG_FORWARDER_INPUT_FILES") {
            Some(value) => Self::parse_input_files(&value)?,
            None => Vec::new(),
        };

        let custom_parsers = match get("LOG_FORWARDER_CUSTOM_PARSERS") {
            Some(value) => serde_json::from_str(&value)
                .map_err(|e| ConfigError::new("LOG_FORWARDER_CUSTOM_PARSERS", e.to_string()))?,
            None => Vec::new(),
        };

        let request_timeout_secs = match get("LOG_FORWARDER_REQUEST_TIMEOUT_SECS") {
            Some(value) => value.parse::<u64>().ok().filter(|s| *s > 0).ok_or_else(|| {
                ConfigError::new(
                    "LOG_FORWARDER_REQUEST_TIMEOUT_SECS",
                    format!("'{}' is not a valid number of seconds", value),
                )
            })?,
            None => DEFAULT_REQUEST_TIMEOUT_SECS,
        };

        Ok(Self {
            queue_url,
            hostname,
            event_buffer,
            input_files,
            syslog_udp: get("LOG_FORWARDER_SYSLOG_UDP"),
            syslog_udp_max,
            syslog_full_message: Self::parse_flag(get("LOG_FORWARDER_SYSLOG_FULL_MESSAGE")),
            syslog_override_time: Self::parse_flag(get("LOG_FORWARDER_SYSLOG_OVERRIDE_TIME")),
            syslog_replace_localhost: Self::parse_flag(get("LOG_FORWARDER_SYSLOG_REPLACE_LOCALHOST")),
            syslog_override_source_ip: get("LOG_FORWARDER_SYSLOG_OVERRIDE_SOURCE_IP"),
            site: get("LOG_FORWARDER_SITE"),
            custom_parsers,
            request_timeout: Duration::from_secs(request_timeout_secs),
        })
    }

    /// Fields added to every outgoing message.
    pub fn static_fields(&self) -> Message {
        let mut fields = Message::new();
        if let Some(site) = &self.site {
            fields.insert("_site", site.as_str());
        }
        fields
    }

    /// Parse a count between 1 and `max`.
    fn parse_range(
        env_var: &str,
        value: Option<String>,
        default: usize,
        max: usize,
    ) -> Result<usize, ConfigError> {
        let Some(value) = value else {
            return Ok(default);
        };

        let n: usize = value
            .parse()
            .map_err(|_| ConfigError::new(env_var, format!("'{}' is not a valid number", value)))?;

        if n == 0 {
            return Err(ConfigError::new(env_var, "value must be greater than 0"));
        }

        if n > max {
            return Err(ConfigError::new(
                env_var,
                format!("value {} exceeds maximum ({})", n, max),
            ));
        }

        Ok(n)
    }

    /// `yes` and `true` (any case) enable a switch, anything else disables it.
    fn parse_flag(value: Option<String>) -> bool {
        value.map_or(false, |v| {
            v.eq_ignore_ascii_case("yes") || v.eq_ignore_ascii_case("true")
        })
    }

    fn parse_input_files(value: &str) -> Result<Vec<InputFile>, ConfigError> {
        let env_var = "LOG_FORWARDER_INPUT_FILES";

        value
            .split(';')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                let parts: Vec<&str> = entry.split(',').map(str::trim).collect();
                match parts.as_slice() {
                    [path, format] if !path.is_empty() && !format.is_empty() => Ok(InputFile {
                        path: PathBuf::from(path),
                        format: format.to_string(),
                        read_all: false,
                    }),
                    [path, format, mode] if !path.is_empty() && !format.is_empty() => {
                        Ok(InputFile {
                            path: PathBuf::from(path),
                            format: format.to_string(),
                            read_all: matches!(
                                mode.to_ascii_lowercase().as_str(),
                                "readall" | "yes" | "true"
                            ),
                        })
                    }
                    _ => Err(ConfigError::new(
                        env_var,
                        format!("'{}' is not of the form path,format[,readall]", entry),
                    )),
                }
            })
            .collect()
    }
}

impl Default for Config {
    /// Create a default configuration using default values.
    ///
    /// This is useful for testing or when environment variables are not set.
    fn default() -> Self {
        Self {
            queue_url: DEFAULT_QUEUE_URL.to_string(),
            hostname: system_hostname(),
            event_buffer: DEFAULT_BUFFER_CAPACITY,
            input_files: Vec::new(),
            syslog_udp: None,
            syslog_udp_max: DEFAULT_MAX_DATAGRAM,
            syslog_full_message: false,
            syslog_override_time: false,
            syslog_replace_localhost: false,
            syslog_override_source_ip: None,
            site: None,
            custom_parsers: Vec::new(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}
