//! Log Forwarder Library
//!
//! This library provides the components of a log forwarder that turns log
//! files and syslog datagrams into GELF messages and delivers them to a queue:
//!
//! - **config**: Environment-based configuration
//! - **message**: The GELF message model
//! - **parser**: Named line parsers (regex, JSON, plaintext, Apache/NGINX built-ins)
//! - **syslog**: Datagram classification and the UDP listener
//! - **buffer**: Bounded drop-oldest event buffer
//! - **reporter**: Internal operational events
//! - **transport**: Queue transport with open/retry
//! - **delivery**: Buffered delivery worker and direct sender
//! - **reconnect**: Coalesced transport reconnects
//! - **source**: File tailing and per-file ingestion workers
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use log_forwarder::buffer::EventBuffer;
//! use log_forwarder::config::Config;
//! use log_forwarder::parser::ParserRegistry;
//! use log_forwarder::reporter::Reporter;
//!
//! let config = Config::from_env().expect("Failed to load config");
//! let registry = ParserRegistry::with_builtins(&config.hostname).expect("Invalid parsers");
//! let reporter = Reporter::new(
//!     &config.hostname,
//!     "10.0.0.1",
//!     config.static_fields(),
//!     Arc::new(EventBuffer::new(config.event_buffer)),
//! );
//!
//! let line = r#"127.0.0.1 - bob [10/Oct/2023:13:55:36 -0700] "GET /x HTTP/1.1" 200 512 "-" "curl/8.0""#;
//! let message = registry.parse(line, "combined").expect("Unparseable line");
//! reporter.submit_message(message).expect("Unencodable message");
//! ```

// Module declarations
pub mod buffer;
pub mod config;
pub mod delivery;
pub mod error;
pub mod message;
pub mod net;
pub mod parser;
pub mod reconnect;
pub mod reporter;
pub mod source;
pub mod syslog;
pub mod transport;

// Re-export commonly used types at crate root for convenience
pub use buffer::{BufferStats, EnqueueOutcome, EventBuffer};
pub use config::{Config, ConfigError, InputFile};
pub use delivery::{DeliveryWorker, DirectSender, Watermark};
pub use error::{Error, Result};
pub use message::{FieldValue, Message, Severity};
pub use parser::{CustomParserDef, ParserKind, ParserRegistry};
pub use reconnect::{ReconnectHandle, ReconnectWatcher};
pub use reporter::Reporter;
pub use source::{FileTail, FileWorker, LineSource};
pub use syslog::{SyslogClassifier, SyslogListener, SyslogOptions};
pub use transport::{HttpTransport, Transport};
