//! Log Forwarder - ships log files and syslog datagrams to a queue as GELF
//!
//! ## Features
//!
//! - Tails (or bulk reads) log files and parses each line with a named format
//! - Receives syslog over UDP and classifies GELF, RFC3164 and RFC5424 datagrams
//! - Buffers messages in a bounded drop-oldest buffer in front of the queue
//! - Reconnects to the queue on delivery failures
//! - Exits immediately on SIGINT/SIGTERM/SIGHUP
//!
//! ## Configuration
//!
//! Configuration is loaded from `LOG_FORWARDER_*` environment variables (see
//! [`log_forwarder::config::Config`]); `RUST_LOG` sets the logging level
//! filter (default: info).

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use log_forwarder::buffer::EventBuffer;
use log_forwarder::config::Config;
use log_forwarder::delivery::{DeliveryWorker, DirectSender};
use log_forwarder::message::Severity;
use log_forwarder::net;
use log_forwarder::parser::ParserRegistry;
use log_forwarder::reconnect::{self, ReconnectWatcher, RECONNECT_QUEUE_CAPACITY};
use log_forwarder::reporter::Reporter;
use log_forwarder::source::FileWorker;
use log_forwarder::syslog::{SyslogClassifier, SyslogListener, SyslogOptions};
use log_forwarder::transport::{open_with_retry, HttpTransport, Transport, OPEN_RETRY_INTERVAL};

#[tokio::main]
async fn main() {
    // Initialize tracing subscriber with environment filter
    init_tracing();

    info!("Starting log forwarder...");

    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(config) => {
            info!(
                queue_url = %config.queue_url,
                hostname = %config.hostname,
                event_buffer = config.event_buffer,
                input_files = config.input_files.len(),
                syslog_udp = config.syslog_udp.as_deref().unwrap_or("disabled"),
                "Configuration loaded"
            );
            config
        }
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    // Built-in and custom parsers
    let registry = match build_registry(&config) {
        Ok(registry) => Arc::new(registry),
        Err(e) => {
            error!(error = %e, "Invalid parser configuration");
            std::process::exit(1);
        }
    };

    let buffer = Arc::new(EventBuffer::new(config.event_buffer));
    let reporter = Arc::new(Reporter::new(
        config.hostname.as_str(),
        event_source_ip(&config),
        config.static_fields(),
        buffer,
    ));

    // Block until the queue is reachable
    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(&config));
    open_with_retry(transport.as_ref(), OPEN_RETRY_INTERVAL).await;
    reporter.report(
        Severity::Info,
        &format!(
            "{} {} started, forwarding to {}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            config.queue_url
        ),
        "",
    );

    let (reconnect_handle, requests) = reconnect::channel(RECONNECT_QUEUE_CAPACITY);
    tokio::spawn(ReconnectWatcher::new(requests, transport.clone(), reporter.clone()).run());
    tokio::spawn(
        DeliveryWorker::new(reporter.clone(), transport.clone(), reconnect_handle.clone()).run(),
    );

    if let Some(bind_addr) = &config.syslog_udp {
        let classifier = Arc::new(SyslogClassifier::new(
            SyslogOptions::from_config(&config),
            reporter.clone(),
        ));
        let listener = SyslogListener::new(
            bind_addr.as_str(),
            config.syslog_udp_max,
            classifier,
            reporter.clone(),
        );
        tokio::spawn(listener.run());
    }

    for input in &config.input_files {
        let worker = FileWorker::new(
            input.clone(),
            registry.clone(),
            reporter.clone(),
            DirectSender::new(transport.clone(), reconnect_handle.clone()),
        );
        tokio::spawn(worker.run());
    }

    info!("Log forwarder running");
    let signal = wait_for_signal().await;

    // Exit without draining the buffer
    reporter.report(
        Severity::Info,
        &format!("Received {}, exiting", signal),
        "",
    );
    std::process::exit(0);
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

/// Registry with the built-in formats plus configured custom parsers.
///
/// Every configured input format must resolve.
fn build_registry(config: &Config) -> log_forwarder::Result<ParserRegistry> {
    let registry = ParserRegistry::with_builtins(config.hostname.as_str())?;
    registry.add_custom(&config.custom_parsers)?;

    for input in &config.input_files {
        if !registry.check_format(&input.format) {
            return Err(log_forwarder::Error::UnknownFormat(format!(
                "{} (for {})",
                input.format,
                input.path.display()
            )));
        }
    }
    Ok(registry)
}

/// `_event_source_ip` for internal events.
fn event_source_ip(config: &Config) -> String {
    config
        .syslog_override_source_ip
        .clone()
        .or_else(|| net::outbound_ip().map(|ip| ip.to_string()))
        .unwrap_or_default()
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut terminate, mut hangup) =
        match (signal(SignalKind::terminate()), signal(SignalKind::hangup())) {
            (Ok(terminate), Ok(hangup)) => (terminate, hangup),
            (Err(e), _) | (_, Err(e)) => {
                error!(error = %e, "Failed to install signal handlers");
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!(error = %e, "Failed to listen for shutdown signal");
                }
                return "SIGINT";
            }
        };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
        _ = hangup.recv() => "SIGHUP",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    "SIGINT"
}
