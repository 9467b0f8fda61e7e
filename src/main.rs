//! Packet Bridge - Main Entry Point
//!
//! Polls a radio or serial transport and publishes each batch of packets
//! to an MQTT broker over TLS. Ctrl-C stops polling, publishes whatever is
//! still queued and disconnects.
//!
//! # Usage
//!
//! ```bash
//! # Serial device to the default broker, config from ~/.config/packet-bridge/bridge.toml
//! packet-bridge --device /dev/ttyUSB0
//!
//! # Explicit broker and CA, TLS 1.3 only
//! packet-bridge --host broker.local --port 8883 --ca-file ca.pem --tls-version 1.3
//!
//! # No hardware, no broker: synthetic packets logged instead of published
//! packet-bridge --source mock --dry-run
//! ```

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, ValueEnum};
use packet_bridge::{
    config::{self, BridgeConfig, SourceKind, TlsVersion},
    pipeline::{shutdown, Pipeline, ShutdownTrigger},
    sink::{MemorySink, MqttSink, PublishSink},
    source::{MockSource, PacketSource, SerialLineSource},
    BridgeError,
};
#[cfg(feature = "rfm69")]
use packet_bridge::source::{RadioSource, SpidevRfm69};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Events kept by the dry-run sink
const DRY_RUN_RETENTION: usize = 1024;

#[derive(Parser)]
#[command(name = "packet-bridge")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Bridge packets from a polled radio/serial link to an MQTT broker")]
#[command(long_about = None)]
struct Cli {
    /// Config file (TOML, or JSON with a .json extension)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Transport source
    #[arg(long, value_enum)]
    source: Option<SourceArg>,

    /// Serial device path
    #[arg(long)]
    device: Option<PathBuf>,

    /// Serial baud rate
    #[arg(long)]
    baud_rate: Option<u32>,

    /// Broker host
    #[arg(long)]
    host: Option<String>,

    /// Broker port
    #[arg(long)]
    port: Option<u16>,

    /// Topic to publish on
    #[arg(short, long)]
    topic: Option<String>,

    /// MQTT client identifier
    #[arg(long)]
    client_id: Option<String>,

    /// Publish QoS (0 or 1)
    #[arg(long)]
    qos: Option<u8>,

    /// PEM file with the CA certificate(s) to trust
    #[arg(long)]
    ca_file: Option<PathBuf>,

    /// Pin the TLS protocol version
    #[arg(long, value_enum)]
    tls_version: Option<TlsVersionArg>,

    /// Allowed cipher suites, `:`-separated
    #[arg(long)]
    cipher_suite: Option<String>,

    /// Allowed key exchange groups, `:`-separated
    #[arg(long)]
    kx_group: Option<String>,

    /// Skip broker certificate verification
    #[arg(long)]
    insecure: bool,

    /// Connect without TLS
    #[arg(long)]
    no_tls: bool,

    /// Milliseconds between transport polls
    #[arg(long)]
    poll_interval_ms: Option<u64>,

    /// Milliseconds between publish loop iterations
    #[arg(long)]
    publish_delay_ms: Option<u64>,

    /// Batches the queue holds before the poller has to wait
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Log payloads instead of connecting to the broker
    #[arg(long)]
    dry_run: bool,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,

    /// Also write logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// More logging (-v debug, -vv trace everywhere)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SourceArg {
    Serial,
    Radio,
    Mock,
}

impl From<SourceArg> for SourceKind {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::Serial => SourceKind::Serial,
            SourceArg::Radio => SourceKind::Radio,
            SourceArg::Mock => SourceKind::Mock,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TlsVersionArg {
    #[value(name = "1.2")]
    Tls12,
    #[value(name = "1.3")]
    Tls13,
}

impl From<TlsVersionArg> for TlsVersion {
    fn from(arg: TlsVersionArg) -> Self {
        match arg {
            TlsVersionArg::Tls12 => TlsVersion::Tls12,
            TlsVersionArg::Tls13 => TlsVersion::Tls13,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging(cli.verbose, cli.log_file.as_deref())?;

    let config = resolve_config(&cli)?;
    if cli.print_config {
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }
    config.validate().context("Invalid configuration")?;

    let (interrupt, token) = shutdown::channel();
    ctrlc_handler(interrupt)?;

    let source = build_source(&config)?;
    let sink = build_sink(&config, cli.dry_run)?;

    tracing::info!(
        source = %config.source.kind,
        sink = sink.name(),
        broker = %config.sink.address(),
        topic = %config.sink.topic,
        "Starting packet bridge"
    );

    let report = Pipeline::new(
        config.pipeline.clone(),
        config.sink.topic.clone(),
        source,
        sink,
    )
    .run(&token);

    let report = match report {
        Ok(report) => report,
        Err(BridgeError::Interrupted) => {
            tracing::info!("Interrupted before the broker connection was up, nothing to drain");
            return Ok(());
        }
        Err(e) => return Err(anyhow::Error::new(e).context("Pipeline failed to start")),
    };

    tracing::info!(
        published = report.drainer.published,
        failed = report.drainer.failed,
        dropped = report.queue.dropped,
        "Packet bridge shutdown complete"
    );
    Ok(())
}

/// Set up stderr logging and, with `--log-file`, a non-blocking file layer
///
/// The returned guard must live until exit so buffered lines are flushed.
fn init_logging(verbose: u8, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let default_filter = match verbose {
        0 => "info,packet_bridge=debug",
        1 => "debug,packet_bridge=trace",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let file_name = path
                .file_name()
                .with_context(|| format!("--log-file {} does not name a file", path.display()))?;
            let dir = match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent,
                _ => Path::new("."),
            };
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;

            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    Ok(guard)
}

/// Load the config file (explicit path, else the default location if it
/// exists, else defaults) and apply command-line overrides
fn resolve_config(cli: &Cli) -> Result<BridgeConfig> {
    let mut config = match &cli.config {
        Some(path) => BridgeConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => match config::default_config_path() {
            Some(path) if path.exists() => {
                tracing::info!("Using config {}", path.display());
                BridgeConfig::load(&path)
                    .with_context(|| format!("Failed to load config {}", path.display()))?
            }
            _ => {
                tracing::debug!("No config file, using defaults");
                BridgeConfig::default()
            }
        },
    };
    apply_overrides(&mut config, cli);
    Ok(config)
}

fn apply_overrides(config: &mut BridgeConfig, cli: &Cli) {
    if let Some(source) = cli.source {
        config.source.kind = source.into();
    }
    if let Some(device) = &cli.device {
        config.source.serial.device = device.clone();
    }
    if let Some(baud_rate) = cli.baud_rate {
        config.source.serial.baud_rate = baud_rate;
    }

    let sink = &mut config.sink;
    if let Some(host) = &cli.host {
        sink.host = host.clone();
    }
    if let Some(port) = cli.port {
        sink.port = port;
    }
    if let Some(topic) = &cli.topic {
        sink.topic = topic.clone();
    }
    if let Some(client_id) = &cli.client_id {
        sink.client_id = client_id.clone();
    }
    if let Some(qos) = cli.qos {
        sink.qos = qos;
    }

    let tls = &mut sink.tls;
    if let Some(ca_file) = &cli.ca_file {
        tls.ca_file = Some(ca_file.clone());
    }
    if let Some(version) = cli.tls_version {
        tls.tls_version = Some(version.into());
    }
    if let Some(suites) = &cli.cipher_suite {
        tls.cipher_suite = Some(suites.clone());
    }
    if let Some(groups) = &cli.kx_group {
        tls.key_exchange_group = Some(groups.clone());
    }
    if cli.insecure {
        tls.insecure_skip_verify = true;
    }
    if cli.no_tls {
        tls.enabled = false;
    }

    let pipeline = &mut config.pipeline;
    if let Some(ms) = cli.poll_interval_ms {
        pipeline.poll_interval_ms = ms;
    }
    if let Some(ms) = cli.publish_delay_ms {
        pipeline.publish_delay_ms = ms;
    }
    if let Some(capacity) = cli.queue_capacity {
        pipeline.queue_capacity = capacity;
    }
}

fn build_source(config: &BridgeConfig) -> Result<Box<dyn PacketSource>> {
    match config.source.kind {
        SourceKind::Serial => Ok(Box::new(SerialLineSource::open(&config.source.serial))),
        SourceKind::Mock => Ok(Box::new(MockSource::from_config(&config.source.mock))),
        #[cfg(feature = "rfm69")]
        SourceKind::Radio => Ok(Box::new(RadioSource::new(
            SpidevRfm69::new(),
            config.source.radio.clone(),
        ))),
        #[cfg(not(feature = "rfm69"))]
        SourceKind::Radio => bail!(
            "this binary was built without the RFM69 driver; rebuild with `--features rfm69` \
             or use --source serial or --source mock"
        ),
    }
}

fn build_sink(config: &BridgeConfig, dry_run: bool) -> Result<Box<dyn PublishSink>> {
    if dry_run {
        return Ok(Box::new(MemorySink::echo(DRY_RUN_RETENTION)));
    }
    let sink = MqttSink::new(config.sink.clone()).context("Invalid broker settings")?;
    Ok(Box::new(sink))
}

/// Setup Ctrl+C handler.
fn ctrlc_handler(interrupt: ShutdownTrigger) -> Result<()> {
    ctrlc::set_handler(move || {
        if interrupt.trigger() {
            tracing::info!("Received Ctrl+C, draining queue and shutting down...");
        } else {
            tracing::info!("Shutdown already in progress");
        }
    })
    .context("Failed to install Ctrl+C handler")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["packet-bridge"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_overrides_apply_to_every_section() {
        let cli = parse(&[
            "--source",
            "mock",
            "--host",
            "broker.local",
            "--port",
            "1883",
            "--topic",
            "sensors/garden",
            "--tls-version",
            "1.3",
            "--no-tls",
            "--queue-capacity",
            "5",
        ]);
        let mut config = BridgeConfig::default();
        apply_overrides(&mut config, &cli);

        assert_eq!(config.source.kind, SourceKind::Mock);
        assert_eq!(config.sink.address(), "broker.local:1883");
        assert_eq!(config.sink.topic, "sensors/garden");
        assert_eq!(config.sink.tls.tls_version, Some(TlsVersion::Tls13));
        assert!(!config.sink.tls.enabled);
        assert_eq!(config.pipeline.queue_capacity, 5);
    }

    #[test]
    fn test_no_flags_keep_config() {
        let cli = parse(&[]);
        let mut config = BridgeConfig::default();
        config.sink.topic = "from/file".to_string();
        apply_overrides(&mut config, &cli);
        assert_eq!(config.sink.topic, "from/file");
        assert!(config.sink.tls.enabled);
    }

    #[cfg(not(feature = "rfm69"))]
    #[test]
    fn test_radio_source_needs_driver_feature() {
        let mut config = BridgeConfig::default();
        config.source.kind = SourceKind::Radio;
        let err = build_source(&config).err().unwrap();
        assert!(err.to_string().contains("rfm69"));
    }

    #[cfg(feature = "rfm69")]
    #[test]
    fn test_radio_source_opens_lazily() {
        let mut config = BridgeConfig::default();
        config.source.kind = SourceKind::Radio;
        config.source.radio.spi_device = PathBuf::from("/nonexistent/spidev9.9");
        let mut source = build_source(&config).unwrap();
        assert_eq!(source.name(), "radio");
        assert!(source.poll().unwrap_err().is_unavailable());
    }

    #[test]
    fn test_serial_overrides() {
        let cli = parse(&["--device", "/dev/ttyAMA0", "--baud-rate", "9600"]);
        let mut config = BridgeConfig::default();
        apply_overrides(&mut config, &cli);
        assert_eq!(config.source.serial.device, PathBuf::from("/dev/ttyAMA0"));
        assert_eq!(config.source.serial.baud_rate, 9600);
    }

    #[test]
    fn test_verbose_counts() {
        assert_eq!(parse(&["-vv"]).verbose, 2);
    }
}
