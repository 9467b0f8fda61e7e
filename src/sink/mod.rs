//! Publish sinks: where batches go
//!
//! The drainer owns exactly one [`PublishSink`] for the lifetime of the
//! pipeline. Connection setup, network housekeeping and transport security
//! are entirely the sink's concern; the pipeline only asks it to connect,
//! publish a payload on a topic, flush and disconnect.
//!
//! # Implementations
//!
//! - [`MqttSink`] - MQTT 3.1.1 through rumqttc, with TLS via rustls
//! - [`MemorySink`] - Records every call in memory (tests, `--dry-run`)

pub mod memory;
pub mod mqtt;
pub mod tls;

pub use memory::{MemorySink, MemorySinkHandle, SinkEvent};
pub use mqtt::MqttSink;

use crate::error::Result;
use crate::types::ConnectionStatus;
use std::time::Duration;

/// Unified interface for publish endpoints
///
/// `connect` only starts the connection; the sink reports
/// [`ConnectionStatus::Connected`] once the remote side has accepted it,
/// which may take several [`service`](PublishSink::service) calls.
pub trait PublishSink: Send {
    /// Short name used in log fields
    fn name(&self) -> &str {
        "sink"
    }

    /// Open the connection and start the session handshake
    fn connect(&mut self) -> Result<()>;

    /// Current connection state
    fn status(&self) -> ConnectionStatus;

    /// Whether payloads can be published right now
    fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// Process incoming traffic and keep the connection alive
    fn service(&mut self) -> Result<()> {
        Ok(())
    }

    /// Deliver one payload on `topic`
    fn publish(&mut self, topic: &str, payload: &str) -> Result<()>;

    /// Wait up to `timeout` for every publish to be acknowledged
    fn flush(&mut self, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    /// Close the connection; calling it again is a no-op
    fn disconnect(&mut self) -> Result<()>;
}

impl<T: PublishSink + ?Sized> PublishSink for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn connect(&mut self) -> Result<()> {
        (**self).connect()
    }

    fn status(&self) -> ConnectionStatus {
        (**self).status()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn service(&mut self) -> Result<()> {
        (**self).service()
    }

    fn publish(&mut self, topic: &str, payload: &str) -> Result<()> {
        (**self).publish(topic, payload)
    }

    fn flush(&mut self, timeout: Duration) -> Result<()> {
        (**self).flush(timeout)
    }

    fn disconnect(&mut self) -> Result<()> {
        (**self).disconnect()
    }
}
