//! Common test utilities and mocks for integration tests

pub mod mocks;

use std::sync::Arc;

use log_forwarder::buffer::EventBuffer;
use log_forwarder::message::Message;
use log_forwarder::reporter::Reporter;

/// Reporter over a fresh buffer of `capacity`, stamping `_site = "dc1"`.
#[allow(dead_code)]
pub fn reporter(capacity: usize) -> Arc<Reporter> {
    let mut fields = Message::new();
    fields.insert("_site", "dc1");
    Arc::new(Reporter::new(
        "collector01",
        "10.0.0.1",
        fields,
        Arc::new(EventBuffer::new(capacity)),
    ))
}

/// Decode every payload, dropping anything that is not a message.
#[allow(dead_code)]
pub fn decode_all(payloads: &[bytes::Bytes]) -> Vec<Message> {
    payloads
        .iter()
        .filter_map(|p| Message::from_json_slice(p).ok())
        .collect()
}
