//! Transport sources: where packets come from
//!
//! A [`PacketSource`] is polled by the pipeline's poller thread at a fixed
//! interval. Each poll returns whatever packets arrived since the last one
//! (possibly none) without waiting for more.
//!
//! # Implementations
//!
//! - [`SerialLineSource`] - One line per poll from a serial character device
//! - [`RadioSource`] - Packets from a radio module behind a [`RadioDriver`]
//! - [`Rfm69`] - The RFM69 driver for [`RadioSource`]
//! - [`MockSource`] - Scripted or synthetic packets for tests and demos
//!
//! # Unavailable vs. failed
//!
//! Sources report missing or not-yet-initialised hardware as
//! [`BridgeError::SourceUnavailable`](crate::error::BridgeError::SourceUnavailable).
//! Any other error is a read failure. The poller treats both as an empty
//! poll; neither stops the pipeline.

pub mod mock;
pub mod radio;
pub mod rfm69;
pub mod serial;

pub use mock::{MockSource, MockStep};
pub use radio::{RadioDriver, RadioSource};
pub use rfm69::Rfm69;
#[cfg(feature = "rfm69")]
pub use rfm69::SpidevRfm69;
pub use serial::SerialLineSource;

use crate::error::Result;
use crate::types::Packet;

/// Unified interface for transport sources
///
/// Implementations must be `Send` so the poller thread can own them.
pub trait PacketSource: Send {
    /// Short name used in log fields
    fn name(&self) -> &str;

    /// Return the packets available right now, in arrival order
    fn poll(&mut self) -> Result<Vec<Packet>>;

    /// Release the hardware; called once when the poller exits
    fn close(&mut self) {}
}

impl<T: PacketSource + ?Sized> PacketSource for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn poll(&mut self) -> Result<Vec<Packet>> {
        (**self).poll()
    }

    fn close(&mut self) {
        (**self).close()
    }
}
