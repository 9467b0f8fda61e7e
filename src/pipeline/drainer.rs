//! Drainer: queue → publish sink
//!
//! The drainer is the only component that talks to the [`PublishSink`].
//! It waits for the sink to connect, then loops: service the connection,
//! pop one batch (bounded wait), publish it as a single space-joined
//! payload, pause. A failed publish is logged and counted; the batch is
//! not retried.

use crate::error::{BridgeError, Result};
use crate::pipeline::queue::PacketQueue;
use crate::pipeline::shutdown::ShutdownToken;
use crate::sink::PublishSink;
use crate::types::{Batch, DrainerStats};
use std::time::{Duration, Instant};

/// Pause between status checks while waiting for the connection
const CONNECT_POLL: Duration = Duration::from_millis(10);

/// Publishes queued batches to one topic
pub struct Drainer<K> {
    sink: K,
    topic: String,
    stats: DrainerStats,
    /// Last `service` call failed; further failures log at debug
    service_failing: bool,
}

impl<K: PublishSink> Drainer<K> {
    pub fn new(sink: K, topic: impl Into<String>) -> Self {
        Self {
            sink,
            topic: topic.into(),
            stats: DrainerStats::default(),
            service_failing: false,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn stats(&self) -> DrainerStats {
        self.stats
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut K {
        &mut self.sink
    }

    /// Consume the drainer, returning the sink
    pub fn into_sink(self) -> K {
        self.sink
    }

    /// Connect the sink and block until it reports connected
    ///
    /// Fails with the sink's own error if the connection is refused,
    /// [`BridgeError::Timeout`] if it is not established within `timeout`,
    /// or [`BridgeError::Interrupted`] as soon as `interrupt` fires. The
    /// sink is disconnected again on failure.
    pub fn wait_for_connection(
        &mut self,
        timeout: Duration,
        interrupt: &ShutdownToken,
    ) -> Result<()> {
        let deadline = Instant::now() + timeout;
        self.sink.connect()?;

        loop {
            if self.sink.is_connected() {
                tracing::info!(sink = self.sink.name(), "Sink connected");
                return Ok(());
            }
            if Instant::now() >= deadline {
                self.abandon_connection();
                return Err(BridgeError::Timeout(format!(
                    "{} sink not connected after {} ms",
                    self.sink.name(),
                    timeout.as_millis()
                )));
            }
            if let Err(e) = self.sink.service() {
                self.abandon_connection();
                return Err(match e {
                    BridgeError::SinkConnect(_) => e,
                    other => BridgeError::SinkConnect(other.to_string()),
                });
            }
            if interrupt.wait_timeout(CONNECT_POLL) {
                tracing::info!(sink = self.sink.name(), "Connection wait interrupted");
                self.abandon_connection();
                return Err(BridgeError::Interrupted);
            }
        }
    }

    fn abandon_connection(&mut self) {
        if let Err(e) = self.sink.disconnect() {
            tracing::debug!("Disconnect after failed connect: {}", e);
        }
    }

    /// Publish one batch; returns whether the sink accepted it
    pub fn forward(&mut self, batch: Batch) -> bool {
        let packets = batch.len();
        let payload = batch.payload();

        match self.sink.publish(&self.topic, &payload) {
            Ok(()) => {
                self.stats.published += 1;
                self.stats.packets += packets as u64;
                tracing::debug!(
                    topic = %self.topic,
                    packets,
                    bytes = payload.len(),
                    received_at = %batch.received_at(),
                    "Batch published"
                );
                true
            }
            Err(e) => {
                self.stats.failed += 1;
                tracing::error!(topic = %self.topic, packets, "Publish failed: {}", e);
                false
            }
        }
    }

    /// Let the sink process network traffic
    pub fn service(&mut self) {
        match self.sink.service() {
            Ok(()) => {
                if self.service_failing {
                    tracing::info!(sink = self.sink.name(), "Sink service recovered");
                }
                self.service_failing = false;
            }
            Err(e) if self.service_failing => tracing::debug!("Sink service failed: {}", e),
            Err(e) => {
                tracing::warn!(sink = self.sink.name(), "Sink service failed: {}", e);
                self.service_failing = true;
            }
        }
    }

    /// One loop iteration without the pause: service, pop, publish
    ///
    /// Returns whether a batch was taken off the queue.
    pub fn step(&mut self, queue: &PacketQueue, pop_timeout: Duration) -> bool {
        self.service();
        match queue.pop_timeout(pop_timeout) {
            Some(batch) => {
                self.forward(batch);
                true
            }
            None => false,
        }
    }

    /// Drain until `interrupt` fires, pausing `delay` between iterations
    pub fn run(
        &mut self,
        queue: &PacketQueue,
        interrupt: &ShutdownToken,
        pop_timeout: Duration,
        delay: Duration,
    ) {
        tracing::info!(topic = %self.topic, "Drainer started");
        while !interrupt.is_cancelled() {
            self.step(queue, pop_timeout);
            if interrupt.wait_timeout(delay) {
                break;
            }
        }
        tracing::info!(
            published = self.stats.published,
            failed = self.stats.failed,
            "Drainer interrupted"
        );
    }
}
