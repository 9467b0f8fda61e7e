//! Section types of the bridge configuration
//!
//! Each section maps to a table in the configuration file:
//!
//! - [`SourceConfig`] - Which transport to poll and how (`[source]`)
//! - [`SinkConfig`] - Broker address, session and TLS options (`[sink]`)
//! - [`PipelineConfig`] - Queue size and loop timing (`[pipeline]`)
//!
//! Every field has a default, so a file only needs to name what differs.
//! Timing values are stored as milliseconds and exposed as [`Duration`]s.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default interval between transport polls
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Default pause between drainer iterations
pub const DEFAULT_PUBLISH_DELAY_MS: u64 = 1000;

/// Default number of batches the queue can hold
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Default time a push waits for queue space before dropping the batch
pub const DEFAULT_PUSH_TIMEOUT_MS: u64 = 500;

/// Default time a drainer pop waits for a batch
pub const DEFAULT_POP_TIMEOUT_MS: u64 = 100;

/// Default time allowed for the broker to accept the session
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Default time allowed for in-flight publishes to be acknowledged at shutdown
pub const DEFAULT_FLUSH_TIMEOUT_MS: u64 = 10_000;

/// Default serial line speed
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default serial read timeout
pub const DEFAULT_SERIAL_READ_TIMEOUT_MS: u64 = 500;

/// Default cap on unacknowledged QoS 1 publishes
pub const DEFAULT_MAX_INFLIGHT: u16 = 100;

/// Largest payload an RFM69 frame can carry, used as the serial packet width
pub const DEFAULT_MAX_PACKET_LEN: usize = 61;

// ==================== Source ====================

/// Which transport source the bridge polls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Line-oriented serial device
    #[default]
    Serial,
    /// Packet radio behind a platform driver
    Radio,
    /// Scripted/synthetic packets, no hardware needed
    Mock,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Serial => write!(f, "serial"),
            SourceKind::Radio => write!(f, "radio"),
            SourceKind::Mock => write!(f, "mock"),
        }
    }
}

/// Transport source configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Selected source
    #[serde(default)]
    pub kind: SourceKind,

    /// Serial line reader settings
    #[serde(default)]
    pub serial: SerialConfig,

    /// Radio settings, handed to the platform driver
    #[serde(default)]
    pub radio: RadioConfig,

    /// Mock source settings
    #[serde(default)]
    pub mock: MockSourceConfig,
}

/// Serial line reader configuration
///
/// The port is opened 8N1 without flow control.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Path to the serial port
    #[serde(default = "default_serial_device")]
    pub device: PathBuf,

    /// Line speed
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// How long one port read waits for data before the reader idles
    #[serde(default = "default_serial_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Lines longer than this many bytes are truncated
    #[serde(default = "default_max_packet_len")]
    pub max_packet_len: usize,
}

fn default_serial_device() -> PathBuf {
    PathBuf::from("/dev/ttyUSB0")
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_serial_read_timeout_ms() -> u64 {
    DEFAULT_SERIAL_READ_TIMEOUT_MS
}

fn default_max_packet_len() -> usize {
    DEFAULT_MAX_PACKET_LEN
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: default_serial_device(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: DEFAULT_SERIAL_READ_TIMEOUT_MS,
            max_packet_len: DEFAULT_MAX_PACKET_LEN,
        }
    }
}

impl SerialConfig {
    /// Per-read timeout on the port
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.max(1))
    }
}

/// Packet radio configuration
///
/// The addressing fields apply to any driver; the bus fields are used by
/// the RFM69 driver on Linux.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    /// This node's address on the radio network
    pub node_id: u8,
    /// Network identifier shared by all nodes
    pub network_id: u8,
    /// Address of the node we expect to hear from
    pub recipient_id: u8,
    /// Carrier frequency in MHz
    pub frequency_mhz: u32,
    /// Whether the module is a high-power variant (RFM69HW/HCW)
    pub high_power: bool,
    /// Answer frames that request an acknowledgement
    pub auto_acknowledge: bool,
    /// spidev node the module is attached to
    pub spi_device: PathBuf,
    /// SPI clock
    pub spi_speed_hz: u32,
    /// GPIO character device holding the reset line
    pub gpio_chip: PathBuf,
    /// Line offset of the module's RESET pin (None = not wired)
    pub reset_pin: Option<u32>,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            node_id: 1,
            network_id: 0,
            recipient_id: 2,
            frequency_mhz: 915,
            high_power: true,
            auto_acknowledge: true,
            spi_device: PathBuf::from("/dev/spidev0.0"),
            spi_speed_hz: 4_000_000,
            gpio_chip: PathBuf::from("/dev/gpiochip0"),
            // BCM 25, the reset line on the common Raspberry Pi bonnets
            reset_pin: Some(25),
        }
    }
}

/// Mock source configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MockSourceConfig {
    /// Synthetic packets generated per poll
    pub packets_per_poll: usize,
    /// Report "unavailable" on every n-th poll (0 disables)
    pub unavailable_every: u32,
}

impl Default for MockSourceConfig {
    fn default() -> Self {
        Self {
            packets_per_poll: 2,
            unavailable_every: 0,
        }
    }
}

// ==================== Sink ====================

/// TLS protocol version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsVersion {
    /// TLS 1.2
    Tls12,
    /// TLS 1.3
    Tls13,
}

impl std::fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TlsVersion::Tls12 => write!(f, "TLS 1.2"),
            TlsVersion::Tls13 => write!(f, "TLS 1.3"),
        }
    }
}

/// Transport security options for the broker connection
///
/// These are passed through the pipeline untouched; only the MQTT sink's
/// TLS layer interprets them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TlsOptions {
    /// Wrap the TCP connection in TLS
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Pin the protocol version (None = 1.2 and 1.3)
    #[serde(default)]
    pub tls_version: Option<TlsVersion>,

    /// PEM file with the CA certificate(s) to trust (None = webpki roots)
    #[serde(default)]
    pub ca_file: Option<PathBuf>,

    /// `:`-separated cipher suite names (None = provider defaults)
    #[serde(default)]
    pub cipher_suite: Option<String>,

    /// `:`-separated key exchange group names (None = provider defaults)
    #[serde(default)]
    pub key_exchange_group: Option<String>,

    /// Accept any server certificate
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

fn default_true() -> bool {
    true
}

impl Default for TlsOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            tls_version: None,
            ca_file: None,
            cipher_suite: None,
            key_exchange_group: None,
            insecure_skip_verify: false,
        }
    }
}

/// MQTT broker connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Broker host name or IP address
    pub host: String,

    /// Broker port
    pub port: u16,

    /// MQTT client identifier
    pub client_id: String,

    /// Topic every batch is published to
    pub topic: String,

    /// Publish QoS (0 or 1)
    pub qos: u8,

    /// MQTT keep-alive in seconds (0 disables pings)
    pub keep_alive_secs: u16,

    /// Ask the broker for a clean session
    pub clean_session: bool,

    /// Optional user name
    #[serde(default)]
    pub username: Option<String>,

    /// Optional password
    #[serde(default)]
    pub password: Option<String>,

    /// TCP connect and TLS handshake timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// QoS 1 publishes allowed to await PUBACK at once; past this a
    /// publish fails instead of waiting
    #[serde(default = "default_max_inflight")]
    pub max_inflight: u16,

    /// Transport security
    #[serde(default)]
    pub tls: TlsOptions,
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_max_inflight() -> u16 {
    DEFAULT_MAX_INFLIGHT
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            host: "192.168.1.99".to_string(),
            port: 8883,
            client_id: "Test".to_string(),
            topic: "test/topic".to_string(),
            qos: 1,
            keep_alive_secs: 20,
            clean_session: true,
            username: None,
            password: None,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            max_inflight: DEFAULT_MAX_INFLIGHT,
            tls: TlsOptions::default(),
        }
    }
}

impl SinkConfig {
    /// `host:port` for logging and socket resolution
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// TCP connect / TLS handshake timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Connect timeout in whole seconds, rounded up, never zero
    pub fn connect_timeout_secs(&self) -> u64 {
        self.connect_timeout_ms.div_ceil(1000).max(1)
    }
}

// ==================== Pipeline ====================

/// Queue sizing and loop timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Interval between transport polls
    pub poll_interval_ms: u64,

    /// Pause between drainer iterations
    pub publish_delay_ms: u64,

    /// Maximum number of batches waiting to be published
    pub queue_capacity: usize,

    /// How long a push waits for space before the batch is dropped
    pub push_timeout_ms: u64,

    /// How long each drainer iteration waits for a batch
    pub pop_timeout_ms: u64,

    /// How long to wait for the sink to report itself connected
    pub connect_timeout_ms: u64,

    /// How long shutdown waits for in-flight publishes
    pub flush_timeout_ms: u64,

    /// How long shutdown waits for the poller to exit (None = derived)
    #[serde(default)]
    pub poller_join_timeout_ms: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            publish_delay_ms: DEFAULT_PUBLISH_DELAY_MS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            push_timeout_ms: DEFAULT_PUSH_TIMEOUT_MS,
            pop_timeout_ms: DEFAULT_POP_TIMEOUT_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            flush_timeout_ms: DEFAULT_FLUSH_TIMEOUT_MS,
            poller_join_timeout_ms: None,
        }
    }
}

impl PipelineConfig {
    /// Interval between transport polls
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Pause between drainer iterations
    pub fn publish_delay(&self) -> Duration {
        Duration::from_millis(self.publish_delay_ms)
    }

    /// Push wait before dropping
    pub fn push_timeout(&self) -> Duration {
        Duration::from_millis(self.push_timeout_ms)
    }

    /// Per-iteration pop wait
    pub fn pop_timeout(&self) -> Duration {
        Duration::from_millis(self.pop_timeout_ms)
    }

    /// Sink connection wait
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Flush wait at shutdown
    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }

    /// Bounded wait for the poller to observe its shutdown token
    ///
    /// A poller can be mid-tick (one interval of sleep, one poll, one push
    /// timeout) when told to stop, so the default covers two intervals,
    /// the push timeout and a second of slack.
    pub fn poller_join_timeout(&self) -> Duration {
        match self.poller_join_timeout_ms {
            Some(ms) => Duration::from_millis(ms),
            None => {
                self.poll_interval() * 2 + self.push_timeout() + Duration::from_secs(1)
            }
        }
    }
}
