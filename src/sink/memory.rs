//! In-memory publish sink
//!
//! [`MemorySink`] never touches the network. Every call is appended to an
//! event log that a cloned [`MemorySinkHandle`] can inspect after the sink
//! has moved into the pipeline. The handle can also inject failures:
//! rejecting specific publishes, refusing to connect, or never finishing
//! the connection handshake.
//!
//! With [`MemorySink::echo`] each payload is also logged at `info`, which
//! is what `packet-bridge --dry-run` uses.

use crate::error::{BridgeError, Result};
use crate::sink::PublishSink;
use crate::types::ConnectionStatus;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// One recorded sink call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Connect,
    Publish { topic: String, payload: String },
    PublishFailed { topic: String, payload: String },
    Flush,
    Disconnect,
}

#[derive(Debug, Default)]
struct MemoryState {
    events: VecDeque<SinkEvent>,
    /// Keep at most this many events (None = unbounded)
    retention: Option<usize>,
    publish_calls: u64,
    /// 1-based publish call numbers that fail
    failing_calls: HashSet<u64>,
    connect_error: Option<String>,
    never_connects: bool,
    /// `service` calls needed after `connect` before the sink is connected
    handshake_services: u32,
}

impl MemoryState {
    fn record(&mut self, event: SinkEvent) {
        self.events.push_back(event);
        if let Some(limit) = self.retention {
            while self.events.len() > limit {
                self.events.pop_front();
            }
        }
    }
}

/// Shared view of a [`MemorySink`]
#[derive(Debug, Clone, Default)]
pub struct MemorySinkHandle {
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySinkHandle {
    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Every recorded event, oldest first
    pub fn events(&self) -> Vec<SinkEvent> {
        self.lock().events.iter().cloned().collect()
    }

    /// Payloads of successful publishes, in order
    pub fn published_payloads(&self) -> Vec<String> {
        self.lock()
            .events
            .iter()
            .filter_map(|event| match event {
                SinkEvent::Publish { payload, .. } => Some(payload.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of `publish` calls, successful or not
    pub fn publish_calls(&self) -> u64 {
        self.lock().publish_calls
    }

    /// Make the `n`-th publish call (1-based) fail
    pub fn fail_publish(&self, n: u64) {
        self.lock().failing_calls.insert(n);
    }

    /// Make `connect` fail with `message`
    pub fn fail_connect(&self, message: impl Into<String>) {
        self.lock().connect_error = Some(message.into());
    }

    /// Accept `connect` but never report the connection as established
    pub fn never_connect(&self) {
        self.lock().never_connects = true;
    }

    /// Require `services` service calls after `connect` before connecting
    pub fn delay_connect(&self, services: u32) {
        self.lock().handshake_services = services;
    }
}

/// Publish sink that records calls instead of sending them
#[derive(Debug, Default)]
pub struct MemorySink {
    handle: MemorySinkHandle,
    status: ConnectionStatus,
    pending_services: u32,
    echo: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log each payload and keep only the latest `retention` events
    pub fn echo(retention: usize) -> Self {
        let sink = Self {
            echo: true,
            ..Self::default()
        };
        sink.handle.lock().retention = Some(retention);
        sink
    }

    /// A handle that stays valid after the sink is moved
    pub fn handle(&self) -> MemorySinkHandle {
        self.handle.clone()
    }
}

impl PublishSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    fn connect(&mut self) -> Result<()> {
        let mut state = self.handle.lock();
        state.record(SinkEvent::Connect);

        if let Some(message) = state.connect_error.clone() {
            self.status = ConnectionStatus::Error;
            return Err(BridgeError::SinkConnect(message));
        }

        self.pending_services = state.handshake_services;
        self.status = if state.never_connects || self.pending_services > 0 {
            ConnectionStatus::Connecting
        } else {
            ConnectionStatus::Connected
        };
        Ok(())
    }

    fn status(&self) -> ConnectionStatus {
        self.status
    }

    fn service(&mut self) -> Result<()> {
        if self.status != ConnectionStatus::Connecting || self.handle.lock().never_connects {
            return Ok(());
        }
        self.pending_services = self.pending_services.saturating_sub(1);
        if self.pending_services == 0 {
            self.status = ConnectionStatus::Connected;
        }
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &str) -> Result<()> {
        if self.status != ConnectionStatus::Connected {
            return Err(BridgeError::NotConnected);
        }

        let mut state = self.handle.lock();
        state.publish_calls += 1;
        let call = state.publish_calls;

        if state.failing_calls.contains(&call) {
            state.record(SinkEvent::PublishFailed {
                topic: topic.to_string(),
                payload: payload.to_string(),
            });
            return Err(BridgeError::publish(topic, format!("injected failure on call {}", call)));
        }

        state.record(SinkEvent::Publish {
            topic: topic.to_string(),
            payload: payload.to_string(),
        });
        if self.echo {
            tracing::info!(topic, payload, "Dry-run publish");
        }
        Ok(())
    }

    fn flush(&mut self, _timeout: Duration) -> Result<()> {
        self.handle.lock().record(SinkEvent::Flush);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        if self.status != ConnectionStatus::Disconnected {
            self.handle.lock().record(SinkEvent::Disconnect);
            self.status = ConnectionStatus::Disconnected;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_calls_in_order() {
        let mut sink = MemorySink::new();
        let handle = sink.handle();

        sink.connect().unwrap();
        assert!(sink.is_connected());
        sink.publish("t", "p1 p2").unwrap();
        sink.flush(Duration::from_secs(1)).unwrap();
        sink.disconnect().unwrap();
        sink.disconnect().unwrap();

        assert_eq!(
            handle.events(),
            vec![
                SinkEvent::Connect,
                SinkEvent::Publish {
                    topic: "t".to_string(),
                    payload: "p1 p2".to_string()
                },
                SinkEvent::Flush,
                SinkEvent::Disconnect,
            ]
        );
    }

    #[test]
    fn test_publish_requires_connection() {
        let mut sink = MemorySink::new();
        assert!(matches!(sink.publish("t", "x"), Err(BridgeError::NotConnected)));
        assert_eq!(sink.handle().publish_calls(), 0);
    }

    #[test]
    fn test_injected_publish_failure() {
        let mut sink = MemorySink::new();
        let handle = sink.handle();
        handle.fail_publish(2);
        sink.connect().unwrap();

        assert!(sink.publish("t", "a").is_ok());
        assert!(sink.publish("t", "b").is_err());
        assert!(sink.publish("t", "c").is_ok());
        assert_eq!(handle.published_payloads(), vec!["a", "c"]);
        assert_eq!(handle.publish_calls(), 3);
    }

    #[test]
    fn test_delayed_and_refused_connections() {
        let mut sink = MemorySink::new();
        sink.handle().delay_connect(2);
        sink.connect().unwrap();
        assert_eq!(sink.status(), ConnectionStatus::Connecting);
        sink.service().unwrap();
        assert!(!sink.is_connected());
        sink.service().unwrap();
        assert!(sink.is_connected());

        let mut refused = MemorySink::new();
        refused.handle().fail_connect("broker down");
        assert!(matches!(refused.connect(), Err(BridgeError::SinkConnect(_))));
        assert_eq!(refused.status(), ConnectionStatus::Error);
    }

    #[test]
    fn test_echo_retention() {
        let mut sink = MemorySink::echo(2);
        let handle = sink.handle();
        sink.connect().unwrap();
        for i in 0..5 {
            sink.publish("t", &i.to_string()).unwrap();
        }
        assert_eq!(handle.published_payloads(), vec!["3", "4"]);
    }
}
