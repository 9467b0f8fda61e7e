//! Packet radio source
//!
//! The radio itself is driven by a [`RadioDriver`], such as the RFM69
//! driver in [`rfm69`](crate::source::rfm69). [`RadioSource`] adds the
//! behaviour the pipeline needs on top of any driver:
//!
//! - Lazy initialisation: the module is brought up on the first poll and
//!   again after any driver error, so a radio that is unplugged and
//!   re-attached recovers without restarting the bridge.
//! - Until initialisation succeeds every poll reports the source as
//!   unavailable, which the poller treats as an idle tick.
//! - Raw frames are decoded into text packets (lossy UTF-8).

use crate::config::RadioConfig;
use crate::error::{BridgeError, Result};
use crate::source::PacketSource;
use crate::types::Packet;

/// Hardware abstraction for a packet radio
///
/// [`Rfm69`](crate::source::Rfm69) implements it over `embedded-hal`.
pub trait RadioDriver: Send {
    /// Bring the module up with the given addressing and band
    fn init(&mut self, config: &RadioConfig) -> Result<()>;

    /// Return every frame received since the last call (non-blocking)
    fn receive(&mut self) -> Result<Vec<Vec<u8>>>;

    /// Die temperature in degrees Celsius, if the module reports it
    fn read_temperature(&mut self) -> Option<f32> {
        None
    }

    /// Put the module to sleep / release the bus
    fn shutdown(&mut self) {}
}

/// Transport source backed by a [`RadioDriver`]
pub struct RadioSource<D: RadioDriver> {
    driver: D,
    config: RadioConfig,
    initialized: bool,
}

impl<D: RadioDriver> RadioSource<D> {
    /// Create a source; the driver is initialised on the first poll
    pub fn new(driver: D, config: RadioConfig) -> Self {
        Self {
            driver,
            config,
            initialized: false,
        }
    }

    /// Whether the driver is currently initialised
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Access the driver
    pub fn driver(&self) -> &D {
        &self.driver
    }

    fn ensure_initialized(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }

        self.driver.init(&self.config).map_err(|e| {
            BridgeError::SourceUnavailable(format!("radio init failed: {}", e))
        })?;
        self.initialized = true;

        tracing::info!(
            node_id = self.config.node_id,
            network_id = self.config.network_id,
            frequency_mhz = self.config.frequency_mhz,
            "Radio initialized"
        );
        if let Some(celsius) = self.driver.read_temperature() {
            tracing::info!(temperature_c = celsius, "Radio temperature");
        }
        Ok(())
    }
}

impl<D: RadioDriver> PacketSource for RadioSource<D> {
    fn name(&self) -> &str {
        "radio"
    }

    fn poll(&mut self) -> Result<Vec<Packet>> {
        self.ensure_initialized()?;

        match self.driver.receive() {
            Ok(frames) => {
                if !frames.is_empty() {
                    tracing::debug!(frames = frames.len(), "Radio frames received");
                }
                Ok(frames.iter().map(|f| Packet::from_bytes(f)).collect())
            }
            Err(e) => {
                // Force a re-init on the next tick.
                self.initialized = false;
                Err(BridgeError::SourceRead(format!("radio receive failed: {}", e)))
            }
        }
    }

    fn close(&mut self) {
        if self.initialized {
            self.driver.shutdown();
            self.initialized = false;
        }
    }
}
