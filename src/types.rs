//! Core data types for the packet bridge
//!
//! This module contains the data structures that flow through the pipeline
//! from a transport source to a publish sink.
//!
//! # Main Types
//!
//! - [`Packet`] - One opaque text unit produced by a transport source
//! - [`Batch`] - The packets returned by a single poll, never empty
//! - [`ConnectionStatus`] - Connection state reported by a publish sink
//! - [`PipelineState`] - The shutdown state machine (Running, Draining, Stopped)
//!
//! # Payload Format
//!
//! A batch is published as a single payload: its packets joined with
//! [`PAYLOAD_DELIMITER`]. Consumers of the topic rely on this format.

use chrono::{DateTime, Utc};
use std::fmt;

/// Separator placed between packets when a batch is turned into a payload
pub const PAYLOAD_DELIMITER: &str = " ";

/// An opaque unit of data received from a transport source
///
/// The pipeline never looks inside a packet; it only moves it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Packet(String);

impl Packet {
    /// Create a packet from text
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    /// Create a packet from raw bytes, replacing invalid UTF-8 sequences
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(String::from_utf8_lossy(bytes).into_owned())
    }

    /// The packet contents
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the packet carries no data
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consume the packet, returning its text
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Packet {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Packet {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The packets produced by one poll cycle
///
/// A batch always holds at least one packet; [`Batch::new`] refuses an
/// empty vector so an idle poll can never reach the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    packets: Vec<Packet>,
    received_at: DateTime<Utc>,
}

impl Batch {
    /// Wrap the packets of one poll, or `None` if there are none
    pub fn new(packets: Vec<Packet>) -> Option<Self> {
        if packets.is_empty() {
            return None;
        }
        Some(Self {
            packets,
            received_at: Utc::now(),
        })
    }

    /// Build a batch from anything convertible to packets
    pub fn from_texts<I, T>(texts: I) -> Option<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<Packet>,
    {
        Self::new(texts.into_iter().map(Into::into).collect())
    }

    /// The packets, in the order they were received
    pub fn packets(&self) -> &[Packet] {
        &self.packets
    }

    /// Number of packets in the batch
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    /// Always false; kept for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Wall-clock time the batch was received
    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// Join the packets into the on-wire payload
    pub fn payload(&self) -> String {
        self.packets
            .iter()
            .map(Packet::as_str)
            .collect::<Vec<_>>()
            .join(PAYLOAD_DELIMITER)
    }

    /// Consume the batch, returning its packets
    pub fn into_packets(self) -> Vec<Packet> {
        self.packets
    }
}

/// Represents the connection status of a publish sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    /// Not connected to any broker
    #[default]
    Disconnected,
    /// Transport is up, waiting for the broker to accept the session
    Connecting,
    /// Connected and ready to publish
    Connected,
    /// Connection error occurred
    Error,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "Disconnected"),
            ConnectionStatus::Connecting => write!(f, "Connecting..."),
            ConnectionStatus::Connected => write!(f, "Connected"),
            ConnectionStatus::Error => write!(f, "Error"),
        }
    }
}

/// Lifecycle of a running pipeline
///
/// `Running -> Draining -> Stopped`; no other transitions exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineState {
    /// Poller and drainer are both active
    #[default]
    Running,
    /// Poller has been told to stop; remaining batches are being published
    Draining,
    /// Queue is empty and the sink has been disconnected
    Stopped,
}

impl PipelineState {
    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        matches!(
            (self, next),
            (PipelineState::Running, PipelineState::Draining)
                | (PipelineState::Draining, PipelineState::Stopped)
        )
    }

    /// Whether this is the terminal state
    pub fn is_terminal(self) -> bool {
        self == PipelineState::Stopped
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Running => write!(f, "Running"),
            PipelineState::Draining => write!(f, "Draining"),
            PipelineState::Stopped => write!(f, "Stopped"),
        }
    }
}

/// What the poller did over its lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollerReport {
    /// Poll calls made
    pub ticks: u64,
    /// Batches accepted by the queue
    pub batches_enqueued: u64,
    /// Packets across all enqueued batches
    pub packets_received: u64,
    /// Polls that returned no packets
    pub idle_ticks: u64,
    /// Polls where the hardware reported itself unavailable
    pub unavailable_ticks: u64,
    /// Polls that failed with a read error
    pub read_errors: u64,
    /// Batches rejected because the queue stayed full
    pub batches_dropped: u64,
}

/// Publish outcome counters for the drainer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainerStats {
    /// Batches the sink accepted
    pub published: u64,
    /// Batches the sink rejected (not retried)
    pub failed: u64,
    /// Packets across all published batches
    pub packets: u64,
}

impl DrainerStats {
    /// Batches handed to the sink, successful or not
    pub fn attempted(&self) -> u64 {
        self.published + self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_batch_is_rejected() {
        assert!(Batch::new(Vec::new()).is_none());
        assert!(Batch::from_texts(Vec::<&str>::new()).is_none());
    }

    #[test]
    fn test_payload_joins_with_single_space() {
        let batch = Batch::from_texts(["p1", "p2"]).unwrap();
        assert_eq!(batch.payload(), "p1 p2");
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn test_single_packet_payload_has_no_delimiter() {
        let batch = Batch::from_texts(["only"]).unwrap();
        assert_eq!(batch.payload(), "only");
    }

    #[test]
    fn test_packet_from_invalid_utf8() {
        let packet = Packet::from_bytes(&[b'o', b'k', 0xff]);
        assert!(packet.as_str().starts_with("ok"));
        assert_eq!(packet.as_str().chars().count(), 3);
    }

    #[test]
    fn test_pipeline_state_transitions() {
        use PipelineState::*;
        assert!(Running.can_transition_to(Draining));
        assert!(Draining.can_transition_to(Stopped));
        assert!(!Running.can_transition_to(Stopped));
        assert!(!Stopped.can_transition_to(Running));
        assert!(!Draining.can_transition_to(Running));
        assert!(!Draining.can_transition_to(Draining));
        assert!(Stopped.is_terminal());
        assert!(!Running.is_terminal());
    }

    proptest! {
        #[test]
        fn test_payload_preserves_packet_order(
            texts in prop::collection::vec("[a-z0-9]{1,8}", 1..20)
        ) {
            let batch = Batch::from_texts(texts.clone()).unwrap();
            let payload = batch.payload();
            let split: Vec<&str> = payload.split(PAYLOAD_DELIMITER).collect();
            prop_assert_eq!(split, texts.iter().map(String::as_str).collect::<Vec<_>>());
        }
    }
}
