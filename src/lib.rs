//! # packet-bridge: polled transport to MQTT
//!
//! Bridges a slow, intermittently attached packet transport (a packet
//! radio or a serial line) to an MQTT broker over TLS, without letting
//! network latency stall packet reception.
//!
//! ## Architecture
//!
//! - **Source**: [`source::PacketSource`] implementations polled on a
//!   dedicated thread
//! - **Queue**: a bounded FIFO of batches between the poller and the
//!   publisher ([`pipeline::PacketQueue`])
//! - **Sink**: [`sink::PublishSink`] implementations; an MQTT 3.1.1
//!   client (rumqttc over rustls) in production
//! - **Shutdown**: a single-shot token stops the poller, then every queued
//!   batch is published before the sink disconnects
//!
//! ## Configuration
//!
//! Settings are read from TOML (or JSON) under the platform config
//! directory:
//!
//! - **Linux**: `~/.config/packet-bridge/bridge.toml`
//! - **macOS**: `~/Library/Application Support/packet-bridge/bridge.toml`
//! - **Windows**: `%APPDATA%\packet-bridge\bridge.toml`
//!
//! ## Example
//!
//! ```ignore
//! use packet_bridge::{
//!     config::BridgeConfig,
//!     pipeline::{shutdown, Pipeline},
//!     sink::MqttSink,
//!     source::SerialLineSource,
//! };
//!
//! let config = BridgeConfig::load_or_default("bridge.toml");
//! let source = SerialLineSource::open(&config.source.serial);
//! let sink = MqttSink::new(config.sink.clone())?;
//!
//! let (interrupt, token) = shutdown::channel();
//! ctrlc::set_handler(move || {
//!     interrupt.trigger();
//! })?;
//!
//! let report = Pipeline::new(config.pipeline, &config.sink.topic, source, sink).run(&token)?;
//! println!("{}", report);
//! ```

pub mod config;
pub mod error;
pub mod pipeline;
pub mod sink;
pub mod source;
pub mod types;

// Re-export commonly used types
pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use pipeline::{Pipeline, PipelineReport};
pub use sink::PublishSink;
pub use source::PacketSource;
pub use types::{Batch, Packet};
