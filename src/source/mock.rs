//! Mock Source Implementation for Testing
//!
//! This module provides a transport source that needs no hardware. It
//! replays a script of poll outcomes and, once the script runs out, either
//! goes quiet or generates numbered synthetic packets.
//!
//! # Example
//!
//! ```ignore
//! use packet_bridge::source::{MockSource, MockStep};
//!
//! let mut source = MockSource::scripted(vec![
//!     MockStep::packets(["p1", "p2"]),
//!     MockStep::Unavailable,
//!     MockStep::packets(["p3"]),
//! ]);
//!
//! assert_eq!(source.poll()?.len(), 2);
//! ```
//!
//! `packet-bridge --source mock` runs the bridge with a synthetic source.

use crate::config::MockSourceConfig;
use crate::error::{BridgeError, Result};
use crate::source::PacketSource;
use crate::types::Packet;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One scripted poll outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockStep {
    /// Return these packets
    Packets(Vec<Packet>),
    /// Return no packets
    Empty,
    /// Report the hardware as not connected
    Unavailable,
    /// Report a read failure
    Fail(String),
    /// Block for the given time, then return these packets
    Delayed(Duration, Vec<Packet>),
}

impl MockStep {
    /// Convenience constructor for a `Packets` step
    pub fn packets<I, T>(texts: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Packet>,
    {
        MockStep::Packets(texts.into_iter().map(Into::into).collect())
    }
}

/// Scripted/synthetic packet source
#[derive(Debug)]
pub struct MockSource {
    script: VecDeque<MockStep>,
    /// Synthetic packets per poll once the script is exhausted (0 = quiet)
    synthetic_per_poll: usize,
    /// Every n-th synthetic poll reports unavailable (0 = never)
    unavailable_every: u32,
    next_seq: u64,
    polls: Arc<AtomicU64>,
    closed: bool,
}

impl MockSource {
    /// Replay `steps`, then report empty polls forever
    pub fn scripted(steps: impl IntoIterator<Item = MockStep>) -> Self {
        Self {
            script: steps.into_iter().collect(),
            synthetic_per_poll: 0,
            unavailable_every: 0,
            next_seq: 1,
            polls: Arc::new(AtomicU64::new(0)),
            closed: false,
        }
    }

    /// Generate `per_poll` numbered packets on every poll
    pub fn synthetic(per_poll: usize) -> Self {
        Self::scripted(Vec::new()).with_synthetic(per_poll)
    }

    /// Build from the `[source.mock]` config section
    pub fn from_config(config: &MockSourceConfig) -> Self {
        let mut source = Self::synthetic(config.packets_per_poll);
        source.unavailable_every = config.unavailable_every;
        source
    }

    /// Fall back to synthetic packets after the script
    pub fn with_synthetic(mut self, per_poll: usize) -> Self {
        self.synthetic_per_poll = per_poll;
        self
    }

    /// Shared counter of `poll` calls, readable after the source moves
    /// into the poller thread
    pub fn poll_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.polls)
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn synthetic_packets(&mut self, poll_number: u64) -> Result<Vec<Packet>> {
        if self.unavailable_every > 0 && poll_number % u64::from(self.unavailable_every) == 0 {
            return Err(BridgeError::SourceUnavailable(
                "mock radio is resting".to_string(),
            ));
        }

        let packets = (0..self.synthetic_per_poll)
            .map(|_| {
                let packet = Packet::new(format!("pkt-{:06}", self.next_seq));
                self.next_seq += 1;
                packet
            })
            .collect();
        Ok(packets)
    }
}

impl PacketSource for MockSource {
    fn name(&self) -> &str {
        "mock"
    }

    fn poll(&mut self) -> Result<Vec<Packet>> {
        let poll_number = self.polls.fetch_add(1, Ordering::SeqCst) + 1;

        match self.script.pop_front() {
            Some(MockStep::Packets(packets)) => Ok(packets),
            Some(MockStep::Empty) => Ok(Vec::new()),
            Some(MockStep::Unavailable) => Err(BridgeError::SourceUnavailable(
                "mock hardware not connected".to_string(),
            )),
            Some(MockStep::Fail(message)) => Err(BridgeError::SourceRead(message)),
            Some(MockStep::Delayed(pause, packets)) => {
                std::thread::sleep(pause);
                Ok(packets)
            }
            None => self.synthetic_packets(poll_number),
        }
    }

    fn close(&mut self) {
        self.closed = true;
    }
}
